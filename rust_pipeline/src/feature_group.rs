//! Per-namespace feature container.
//!
//! A [`Features`] group stores its features as parallel arrays: `values[i]`
//! and `indices[i]` describe feature `i`, and `audit_info` is either empty or
//! holds exactly one [`AuditStrings`] per feature. `sum_feat_sq` tracks the
//! sum of squared values through every tracked mutation (`add_feature_raw`,
//! `truncate_to`, `concat`); anything that rewrites values in place must call
//! [`Features::recompute_sum_feat_sq`] afterwards.

use std::cmp::Ordering;
use std::fmt;

use crate::constants::{FeatureIndex, FeatureValue, DEFAULT_NAMESPACE_STR};
use crate::hash::{chain_hash_feature, chain_hash_feature_index, hash_feature, hash_feature_index};
use crate::stash::StashGuard;

/// Human-readable name of one feature, kept only in audit mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditStrings {
    pub namespace_name: String,
    pub namespace_hash: u64,
    pub feature_name: String,
    pub str_value: String,
}

pub(crate) static EMPTY_AUDIT_STRINGS: AuditStrings = AuditStrings {
    namespace_name: String::new(),
    namespace_hash: 0,
    feature_name: String::new(),
    str_value: String::new(),
};

impl AuditStrings {
    pub fn new(namespace_name: &str, namespace_hash: u64, feature_name: &str) -> Self {
        AuditStrings {
            namespace_name: namespace_name.to_string(),
            namespace_hash,
            feature_name: feature_name.to_string(),
            str_value: String::new(),
        }
    }

    pub fn with_value(mut self, str_value: &str) -> Self {
        self.str_value = str_value.to_string();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.namespace_name.is_empty() && self.feature_name.is_empty() && self.str_value.is_empty()
    }
}

/// `namespace^feature^value`; the namespace is omitted for the default
/// namespace and the value when there is none.
impl fmt::Display for AuditStrings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace_name.is_empty() && self.namespace_name != DEFAULT_NAMESPACE_STR {
            write!(f, "{}^", self.namespace_name)?;
        }
        f.write_str(&self.feature_name)?;
        if !self.str_value.is_empty() {
            write!(f, "^{}", self.str_value)?;
        }
        Ok(())
    }
}

/// Features of a single namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub namespace_name: String,
    pub namespace_hash: u64,
    /// Multiplier applied to every value added through `add_feature*`.
    pub namespace_value: FeatureValue,
    pub(crate) values: Vec<FeatureValue>,
    pub(crate) indices: Vec<FeatureIndex>,
    pub(crate) audit_info: Vec<AuditStrings>,
    pub(crate) sum_feat_sq: f32,
}

impl Default for Features {
    fn default() -> Self {
        Self::new()
    }
}

impl Features {
    pub fn new() -> Self {
        Features {
            namespace_name: String::new(),
            namespace_hash: 0,
            namespace_value: 1.0,
            values: Vec::new(),
            indices: Vec::new(),
            audit_info: Vec::new(),
            sum_feat_sq: 0.0,
        }
    }

    pub fn with_namespace(namespace_name: &str, namespace_hash: u64) -> Self {
        Features {
            namespace_name: namespace_name.to_string(),
            namespace_hash,
            ..Self::new()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    #[inline]
    pub fn indices(&self) -> &[FeatureIndex] {
        &self.indices
    }

    #[inline]
    pub fn audit_info(&self) -> &[AuditStrings] {
        &self.audit_info
    }

    #[inline]
    pub fn has_audit(&self) -> bool {
        !self.audit_info.is_empty()
    }

    #[inline]
    pub fn sum_feat_sq(&self) -> f32 {
        self.sum_feat_sq
    }

    /// Rewrite indices in place. Values and `sum_feat_sq` are untouched.
    #[inline]
    pub fn indices_mut(&mut self) -> &mut [FeatureIndex] {
        &mut self.indices
    }

    /// Rewrite values in place. Call [`Features::recompute_sum_feat_sq`] afterwards.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [FeatureValue] {
        &mut self.values
    }

    pub fn recompute_sum_feat_sq(&mut self) {
        self.sum_feat_sq = self.values.iter().map(|v| v * v).sum();
    }

    /// Audit entry of feature `i`, or an empty record when audit is off.
    #[inline]
    pub fn audit_at(&self, i: usize) -> &AuditStrings {
        self.audit_info.get(i).unwrap_or(&EMPTY_AUDIT_STRINGS)
    }

    /// `(value, index)` pairs in storage order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (FeatureValue, FeatureIndex)> + '_ {
        self.values.iter().copied().zip(self.indices.iter().copied())
    }

    /// `(value, index, audit)` triples; audit is `None` when audit is off.
    pub fn audit_iter(
        &self,
    ) -> impl Iterator<Item = (FeatureValue, FeatureIndex, Option<&AuditStrings>)> + '_ {
        self.iter()
            .enumerate()
            .map(move |(i, (v, idx))| (v, idx, self.audit_info.get(i)))
    }

    pub fn clear(&mut self) {
        self.sum_feat_sq = 0.0;
        self.values.clear();
        self.indices.clear();
        self.audit_info.clear();
    }

    // ------------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------------

    /// Append an already-hashed feature. Does not hash and ignores
    /// `namespace_value`.
    #[inline]
    pub fn add_feature_raw(&mut self, index: FeatureIndex, value: FeatureValue) {
        self.values.push(value);
        self.indices.push(index);
        self.sum_feat_sq += value * value;
    }

    /// Append an audit record for the most recently added feature.
    pub fn add_audit_string(&mut self, feature_name: &str) {
        self.audit_info.push(AuditStrings::new(
            &self.namespace_name,
            self.namespace_hash,
            feature_name,
        ));
    }

    pub fn add_audit_string_with_value(&mut self, feature_name: &str, str_value: &str) {
        self.audit_info.push(
            AuditStrings::new(&self.namespace_name, self.namespace_hash, feature_name)
                .with_value(str_value),
        );
    }

    /// Hash `name` into this namespace and append it with `value * namespace_value`.
    pub fn add_feature(&mut self, name: &str, value: FeatureValue, audit: bool) {
        let index = hash_feature(name, self.namespace_hash);
        self.add_feature_raw(index, value * self.namespace_value);
        if audit {
            self.add_audit_string(name);
        }
    }

    /// Integer-keyed variant of [`Features::add_feature`].
    pub fn add_feature_index(&mut self, index: FeatureIndex, value: FeatureValue, audit: bool) {
        let index_hash = hash_feature_index(index, self.namespace_hash);
        self.add_feature_raw(index_hash, value * self.namespace_value);
        if audit {
            self.add_audit_string(&index.to_string());
        }
    }

    /// String-valued feature: chain hashed, inserted with `namespace_value`.
    pub fn add_feature_str(&mut self, name: &str, str_value: &str, audit: bool) {
        let index = chain_hash_feature(name, str_value, self.namespace_hash);
        self.add_feature_raw(index, self.namespace_value);
        if audit {
            self.add_audit_string_with_value(name, str_value);
        }
    }

    /// String-valued feature with an integer key.
    pub fn add_feature_index_str(&mut self, index: FeatureIndex, str_value: &str, audit: bool) {
        let index_hash = chain_hash_feature_index(index, str_value, self.namespace_hash);
        self.add_feature_raw(index_hash, self.namespace_value);
        if audit {
            self.add_audit_string_with_value(&index.to_string(), str_value);
        }
    }

    // ------------------------------------------------------------------------
    // Bulk mutation
    // ------------------------------------------------------------------------

    /// Shrink to `new_len` features, recomputing the removed sum of squares.
    pub fn truncate_to(&mut self, new_len: usize) {
        let removed: f32 = self
            .values
            .get(new_len..)
            .map_or(0.0, |tail| tail.iter().map(|v| v * v).sum());
        self.truncate_to_with_removed(new_len, removed);
    }

    /// Shrink to `new_len` features when the caller already knows the sum of
    /// squares of the dropped tail.
    pub fn truncate_to_with_removed(&mut self, new_len: usize, removed_sum_sq: f32) {
        debug_assert!(new_len <= self.len(), "truncate_to past the end");
        self.sum_feat_sq -= removed_sum_sq;
        self.values.truncate(new_len);
        self.indices.truncate(new_len);
        self.audit_info.truncate(new_len);
    }

    /// Append every feature of `other`.
    pub fn concat(&mut self, other: &Features) {
        debug_assert!(
            self.is_empty() || self.audit_info.is_empty() == other.audit_info.is_empty(),
            "concat of groups with mismatched audit state"
        );
        self.sum_feat_sq += other.sum_feat_sq;
        self.values.extend_from_slice(&other.values);
        self.indices.extend_from_slice(&other.indices);
        self.audit_info.extend_from_slice(&other.audit_info);
    }

    /// Stable sort by `(index & parse_mask, value)`. Returns false if empty.
    pub fn sort(&mut self, parse_mask: u64) -> bool {
        if self.indices.is_empty() {
            return false;
        }

        let mut order: Vec<usize> = (0..self.indices.len()).collect();
        order.sort_by(|&a, &b| {
            let ka = self.indices[a] & parse_mask;
            let kb = self.indices[b] & parse_mask;
            ka.cmp(&kb).then_with(|| {
                self.values[a]
                    .partial_cmp(&self.values[b])
                    .unwrap_or(Ordering::Equal)
            })
        });

        let with_audit = !self.audit_info.is_empty();
        let mut visited = vec![false; order.len()];
        for start in 0..order.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            let mut prev = start;
            let mut next = order[start];
            while next != start {
                self.values.swap(prev, next);
                self.indices.swap(prev, next);
                if with_audit {
                    self.audit_info.swap(prev, next);
                }
                visited[next] = true;
                prev = next;
                next = order[next];
            }
        }
        true
    }

    /// Snapshot the whole group; the guard restores it when dropped.
    pub fn stash_features(&mut self) -> StashGuard<'_, Features, Features> {
        let snapshot = self.clone();
        StashGuard::new(self, snapshot, |target, saved| *target = saved)
    }
}

/// Sparse dot product of two groups sorted by index.
pub fn features_dot_product(a: &Features, b: &Features) -> f32 {
    debug_assert!(a.indices.windows(2).all(|w| w[0] <= w[1]), "left side unsorted");
    debug_assert!(b.indices.windows(2).all(|w| w[0] <= w[1]), "right side unsorted");

    let mut dot = 0.0f32;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        match a.indices[i].cmp(&b.indices[j]) {
            Ordering::Equal => {
                dot += a.values[i] * b.values[j];
                i += 1;
                j += 1;
            }
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
        }
    }
    dot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(raw: &[(u64, f32)]) -> Features {
        let mut fs = Features::new();
        for &(i, v) in raw {
            fs.add_feature_raw(i, v);
        }
        fs
    }

    #[test_log::test]
    fn add_feature_raw_tracks_sum_of_squares() {
        let fs = group(&[(1, 2.0), (2, 3.0), (3, 0.0)]);
        assert_eq!(fs.len(), 3);
        assert_eq!(fs.sum_feat_sq(), 13.0);
    }

    #[test_log::test]
    fn add_feature_applies_namespace_value_and_keeps_zero() {
        let mut fs = Features::with_namespace("ctx", 77);
        fs.namespace_value = 0.5;
        fs.add_feature("price", 4.0, false);
        fs.add_feature_index(3, 0.0, false);
        assert_eq!(fs.values(), &[2.0, 0.0]);
        assert_eq!(fs.indices()[0], hash_feature("price", 77));
        assert_eq!(fs.indices()[1], 80);
        assert!(!fs.has_audit());
    }

    #[test_log::test]
    fn add_feature_str_chain_hashes_and_audits() {
        let mut fs = Features::with_namespace("user", 5);
        fs.add_feature_str("color", "red", true);
        assert_eq!(fs.indices()[0], chain_hash_feature("color", "red", 5));
        assert_eq!(fs.values(), &[1.0]);
        assert_eq!(fs.audit_info()[0].to_string(), "user^color^red");
    }

    #[test_log::test]
    fn audit_display_omits_default_namespace() {
        let a = AuditStrings::new(" ", 0, "word");
        assert_eq!(a.to_string(), "word");
        let b = AuditStrings::new("", 0, "word").with_value("x");
        assert_eq!(b.to_string(), "word^x");
    }

    #[test_log::test]
    fn sort_orders_by_masked_index_then_value() {
        let mut fs = group(&[(5, 1.0), (1, 3.0), (0x105, 0.5), (1, 2.0)]);
        assert!(fs.sort(0xff));
        assert_eq!(fs.indices(), &[1, 1, 0x105, 5]);
        assert_eq!(fs.values(), &[2.0, 3.0, 0.5, 1.0]);
        assert!(!Features::new().sort(u64::MAX));
    }

    #[test_log::test]
    fn sort_keeps_audit_aligned() {
        let mut fs = Features::with_namespace("n", 0);
        for (i, name) in [(3u64, "c"), (1, "a"), (2, "b")] {
            fs.add_feature_raw(i, i as f32);
            fs.add_audit_string(name);
        }
        fs.sort(u64::MAX);
        let names: Vec<&str> = fs.audit_info().iter().map(|a| a.feature_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(fs.values(), &[1.0, 2.0, 3.0]);
    }

    #[test_log::test]
    fn truncate_recomputes_removed_tail() {
        let mut fs = group(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        fs.truncate_to(1);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs.sum_feat_sq(), 1.0);

        let mut fs = group(&[(1, 1.0), (2, 2.0)]);
        fs.truncate_to_with_removed(1, 4.0);
        assert_eq!(fs.sum_feat_sq(), 1.0);
    }

    #[test_log::test]
    fn concat_appends_and_sums() {
        let mut a = group(&[(1, 1.0)]);
        let b = group(&[(2, 2.0), (3, 1.0)]);
        a.concat(&b);
        assert_eq!(a.indices(), &[1, 2, 3]);
        assert_eq!(a.sum_feat_sq(), 6.0);
    }

    #[test_log::test]
    fn dot_product_merges_sorted_groups() {
        let a = group(&[(1, 2.0), (3, 1.0), (7, 4.0)]);
        let b = group(&[(0, 9.0), (3, 5.0), (7, 0.5), (9, 1.0)]);
        assert_eq!(features_dot_product(&a, &b), 7.0);
        assert_eq!(features_dot_product(&a, &a), a.sum_feat_sq());
    }

    #[test_log::test]
    fn stash_restores_group() {
        let mut fs = group(&[(1, 1.0)]);
        {
            let mut guard = fs.stash_features();
            guard.add_feature_raw(2, 2.0);
            guard.clear();
        }
        assert_eq!(fs, group(&[(1, 1.0)]));
    }
}
