//! Lightweight example construction and scoped feature-space edits.
//!
//! - `ExamplePredictBuilder`: push features into one namespace without going
//!   through the full `add_feature` path (no `namespace_value`, no audit)
//! - `NamespaceCopyGuard`: temporary features in a namespace, undone on drop
//! - `FeatureOffsetGuard`: temporary `ft_index_offset`
//! - `StrideShiftGuard`: temporarily shift every feature index left

use std::ops::{Deref, DerefMut};

use crate::constants::{FeatureIndex, FeatureValue, NamespaceIndex, DEFAULT_NAMESPACE};
use crate::example::ExamplePredict;
use crate::feature_group::Features;
use crate::hash::hashstring;

/// Appends raw features to one namespace of an example.
pub struct ExamplePredictBuilder<'a> {
    ex: &'a mut ExamplePredict,
    namespace_idx: NamespaceIndex,
    namespace_hash: u64,
}

impl<'a> ExamplePredictBuilder<'a> {
    /// Namespace named `namespace_name`: id is its first byte, hash is
    /// `hashstring(name, 0)`.
    pub fn new(ex: &'a mut ExamplePredict, namespace_name: &str) -> Self {
        let namespace_idx = namespace_name
            .as_bytes()
            .first()
            .copied()
            .unwrap_or(DEFAULT_NAMESPACE);
        let namespace_hash = hashstring(namespace_name.as_bytes(), 0);
        Self::with_hash(ex, namespace_idx, namespace_hash)
    }

    /// Namespace `namespace_idx`, salted with the id itself.
    pub fn with_index(ex: &'a mut ExamplePredict, namespace_idx: NamespaceIndex) -> Self {
        Self::with_hash(ex, namespace_idx, namespace_idx as u64)
    }

    fn with_hash(ex: &'a mut ExamplePredict, namespace_idx: NamespaceIndex, namespace_hash: u64) -> Self {
        ex.feature_group(namespace_idx);
        ExamplePredictBuilder {
            ex,
            namespace_idx,
            namespace_hash,
        }
    }

    pub fn namespace_idx(&self) -> NamespaceIndex {
        self.namespace_idx
    }

    pub fn push_feature_string(&mut self, feature_name: &str, value: FeatureValue) {
        let index = hashstring(feature_name.as_bytes(), self.namespace_hash);
        self.ex.feature_group(self.namespace_idx).add_feature_raw(index, value);
    }

    pub fn push_feature(&mut self, feature_idx: FeatureIndex, value: FeatureValue) {
        let index = self.namespace_hash.wrapping_add(feature_idx);
        self.ex.feature_group(self.namespace_idx).add_feature_raw(index, value);
    }
}

/// Adds temporary features to a namespace.
///
/// On drop the namespace returns to its state at creation: a namespace that
/// did not exist is deleted, an existing one gets its features back.
pub struct NamespaceCopyGuard<'a> {
    ex: &'a mut ExamplePredict,
    namespace_idx: NamespaceIndex,
    saved: Option<Features>,
}

impl<'a> NamespaceCopyGuard<'a> {
    pub fn new(ex: &'a mut ExamplePredict, namespace_idx: NamespaceIndex) -> Self {
        let saved = ex.get(namespace_idx).cloned();
        ex.feature_group(namespace_idx);
        NamespaceCopyGuard {
            ex,
            namespace_idx,
            saved,
        }
    }

    pub fn feature_push_back(&mut self, value: FeatureValue, index: FeatureIndex) {
        self.ex
            .feature_group(self.namespace_idx)
            .add_feature_raw(index, value);
    }
}

impl Deref for NamespaceCopyGuard<'_> {
    type Target = ExamplePredict;

    fn deref(&self) -> &ExamplePredict {
        self.ex
    }
}

impl Drop for NamespaceCopyGuard<'_> {
    fn drop(&mut self) {
        match self.saved.take() {
            Some(fs) => self.ex.set_features(self.namespace_idx, fs),
            None => {
                self.ex.delete_namespace(self.namespace_idx);
            }
        }
    }
}

/// Sets `ft_index_offset` for the guard's lifetime.
pub struct FeatureOffsetGuard<'a> {
    ex: &'a mut ExamplePredict,
    old_offset: u64,
}

impl<'a> FeatureOffsetGuard<'a> {
    pub fn new(ex: &'a mut ExamplePredict, offset: u64) -> Self {
        let old_offset = ex.ft_index_offset;
        ex.ft_index_offset = offset;
        FeatureOffsetGuard { ex, old_offset }
    }
}

impl Deref for FeatureOffsetGuard<'_> {
    type Target = ExamplePredict;

    fn deref(&self) -> &ExamplePredict {
        self.ex
    }
}

impl DerefMut for FeatureOffsetGuard<'_> {
    fn deref_mut(&mut self) -> &mut ExamplePredict {
        self.ex
    }
}

impl Drop for FeatureOffsetGuard<'_> {
    fn drop(&mut self) {
        self.ex.ft_index_offset = self.old_offset;
    }
}

/// Shifts every feature index left by `shift` bits, and back on drop.
pub struct StrideShiftGuard<'a> {
    ex: &'a mut ExamplePredict,
    shift: u32,
}

impl<'a> StrideShiftGuard<'a> {
    pub fn new(ex: &'a mut ExamplePredict, shift: u32) -> Self {
        if shift > 0 {
            for (_, fs) in ex.iter_mut() {
                for index in fs.indices_mut() {
                    *index <<= shift;
                }
            }
        }
        StrideShiftGuard { ex, shift }
    }
}

impl Deref for StrideShiftGuard<'_> {
    type Target = ExamplePredict;

    fn deref(&self) -> &ExamplePredict {
        self.ex
    }
}

impl Drop for StrideShiftGuard<'_> {
    fn drop(&mut self) {
        if self.shift > 0 {
            for (_, fs) in self.ex.iter_mut() {
                for index in fs.indices_mut() {
                    *index >>= self.shift;
                }
            }
        }
    }
}
