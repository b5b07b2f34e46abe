//! Weight storage.
//!
//! A weight index is laid out as `hash | width | stride`, from the high bits
//! down:
//!   - `stride_shift` low bits select one of the `2^stride_shift` co-located
//!     slots of a feature (weight plus learner-private state)
//!   - the next `feature_width_bits` bits select a sub-model
//!   - the remaining `hash_bits` bits come from the feature hash
//!
//! Every access masks the index with `weight_mask`, so indices wrap around
//! the store instead of growing it.
//!
//! [`DenseParameters`] keeps the whole span in one allocation;
//! [`SparseParameters`] allocates one `width × stride` block per hash value
//! on first access. [`Parameters`] picks one at construction time.
//!
//! Weights are [`AtomicWeight`] cells so that several learner threads can
//! update one store concurrently. Updates are lossy under contention (a
//! relaxed read-modify-write), which asynchronous SGD tolerates.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Result;

pub mod dense;
pub mod sparse;

pub use dense::{DenseIter, DenseParameters, WeightSlot};
pub use sparse::SparseParameters;

/// An `f32` weight that can be shared between threads.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicWeight(AtomicU32);

impl AtomicWeight {
    #[inline]
    pub const fn zero() -> Self {
        AtomicWeight(AtomicU32::new(0))
    }

    #[inline]
    pub fn new(value: f32) -> Self {
        AtomicWeight(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed)
    }

    /// Non-atomic read-modify-write; concurrent updates may be lost.
    #[inline]
    pub fn update<F: FnOnce(f32) -> f32>(&self, f: F) {
        self.store(f(self.load()))
    }
}

/// Fills one freshly allocated `stride`-wide slot. The second argument is
/// the flat weight index of the slot's first cell.
pub type WeightInitFn = Arc<dyn Fn(&mut [f32], u64) + Send + Sync>;

#[inline]
pub(crate) fn weight_mask_for(hash_bits: u32, feature_width_bits: u32, stride_shift: u32) -> u64 {
    let total = hash_bits + feature_width_bits + stride_shift;
    if total >= 64 {
        u64::MAX
    } else {
        (1u64 << total) - 1
    }
}

/// Read/write surface shared by both backends.
pub trait WeightStore {
    fn get(&self, index: u64) -> f32;

    fn set(&self, index: u64, value: f32);

    /// `w[index] = f(w[index])`.
    fn update<F: FnOnce(f32) -> f32>(&self, index: u64, f: F) {
        self.set(index, f(self.get(index)));
    }

    #[inline]
    fn add(&self, index: u64, delta: f32) {
        self.update(index, |w| w + delta);
    }

    fn hash_bits(&self) -> u32;

    fn feature_width_bits(&self) -> u32;

    fn stride_shift(&self) -> u32;

    #[inline]
    fn stride(&self) -> u64 {
        1u64 << self.stride_shift()
    }

    /// `2^hash_bits - 1`: the hash part of an index, before width and stride.
    #[inline]
    fn hash_mask(&self) -> u64 {
        weight_mask_for(self.hash_bits(), 0, 0)
    }

    fn weight_mask(&self) -> u64;

    /// Number of addressable weights.
    #[inline]
    fn raw_length(&self) -> u64 {
        self.weight_mask().wrapping_add(1)
    }

    /// Flat index of `(hash_index, width_index, stride_index)`.
    #[inline]
    fn index_of(&self, hash_index: u64, width_index: u64, stride_index: u64) -> u64 {
        let ss = self.stride_shift();
        (hash_index << (self.feature_width_bits() + ss)) + (width_index << ss) + stride_index
    }

    /// Flat index of `(hash_index | width_index, stride_index)`.
    #[inline]
    fn strided_index_of(&self, hash_width_index: u64, stride_index: u64) -> u64 {
        (hash_width_index << self.stride_shift()) + stride_index
    }

    fn not_null(&self) -> bool;

    /// Install an initialiser. Dense stores run it over every slot now;
    /// sparse stores run it on blocks allocated afterwards.
    fn set_default(&mut self, f: WeightInitFn);

    /// Zero stride slot `offset` of every feature.
    fn set_zero(&self, offset: usize);
}

/// Dense or sparse store, chosen once.
#[derive(Debug)]
pub enum Parameters {
    Dense(DenseParameters),
    Sparse(SparseParameters),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Parameters::Dense($p) => $body,
            Parameters::Sparse($p) => $body,
        }
    };
}

impl Parameters {
    pub fn new(sparse: bool, hash_bits: u32, feature_width_bits: u32, stride_shift: u32) -> Self {
        if sparse {
            Parameters::Sparse(SparseParameters::new(hash_bits, feature_width_bits, stride_shift))
        } else {
            Parameters::Dense(DenseParameters::new(hash_bits, feature_width_bits, stride_shift))
        }
    }

    #[inline]
    pub fn is_sparse(&self) -> bool {
        matches!(self, Parameters::Sparse(_))
    }

    /// A second handle on the same storage.
    pub fn shallow_copy(&self) -> Self {
        match self {
            Parameters::Dense(d) => Parameters::Dense(d.shallow_copy()),
            Parameters::Sparse(s) => Parameters::Sparse(s.shallow_copy()),
        }
    }

    /// Move dense weights into process-shared memory.
    pub fn share(&mut self) -> Result<()> {
        dispatch!(self, p => p.share())
    }

    /// Contiguous view of every weight. Dense stores only.
    pub fn dense_slice(&self) -> Result<&[AtomicWeight]> {
        match self {
            Parameters::Dense(d) => Ok(d.as_slice()),
            Parameters::Sparse(_) => Err(crate::error::FeatureError::Unsupported(
                "sparse weights have no contiguous storage".to_string(),
            )),
        }
    }
}

impl WeightStore for Parameters {
    #[inline]
    fn get(&self, index: u64) -> f32 {
        dispatch!(self, p => p.get(index))
    }

    #[inline]
    fn set(&self, index: u64, value: f32) {
        dispatch!(self, p => p.set(index, value))
    }

    #[inline]
    fn update<F: FnOnce(f32) -> f32>(&self, index: u64, f: F) {
        dispatch!(self, p => p.update(index, f))
    }

    #[inline]
    fn hash_bits(&self) -> u32 {
        dispatch!(self, p => p.hash_bits())
    }

    #[inline]
    fn feature_width_bits(&self) -> u32 {
        dispatch!(self, p => p.feature_width_bits())
    }

    #[inline]
    fn stride_shift(&self) -> u32 {
        dispatch!(self, p => p.stride_shift())
    }

    #[inline]
    fn weight_mask(&self) -> u64 {
        dispatch!(self, p => p.weight_mask())
    }

    fn not_null(&self) -> bool {
        dispatch!(self, p => p.not_null())
    }

    fn set_default(&mut self, f: WeightInitFn) {
        dispatch!(self, p => p.set_default(f))
    }

    fn set_zero(&self, offset: usize) {
        dispatch!(self, p => p.set_zero(offset))
    }
}
