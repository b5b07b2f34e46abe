//! Dense weight store: one power-of-two array addressed by `index & weight_mask`.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use super::{weight_mask_for, AtomicWeight, WeightInitFn, WeightStore};
use crate::error::Result;

enum DenseBuffer {
    Heap(Box<[AtomicWeight]>),
    #[cfg(unix)]
    Shared(shared::SharedRegion),
}

impl DenseBuffer {
    fn zeroed(len: usize) -> Self {
        DenseBuffer::Heap((0..len).map(|_| AtomicWeight::zero()).collect())
    }

    #[inline]
    fn as_slice(&self) -> &[AtomicWeight] {
        match self {
            DenseBuffer::Heap(weights) => &weights[..],
            #[cfg(unix)]
            DenseBuffer::Shared(region) => region.as_slice(),
        }
    }
}

#[cfg(unix)]
mod shared {
    use std::ffi::c_void;
    use std::num::NonZeroUsize;
    use std::ptr::NonNull;

    use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

    use super::AtomicWeight;
    use crate::error::{FeatureError, Result};

    /// Anonymous `MAP_SHARED` mapping, inherited by forked worker processes.
    pub(super) struct SharedRegion {
        ptr: NonNull<c_void>,
        len: usize,
    }

    impl SharedRegion {
        pub(super) fn copy_of(weights: &[AtomicWeight]) -> Result<Self> {
            let bytes = std::mem::size_of_val(weights);
            let length = NonZeroUsize::new(bytes).ok_or_else(|| {
                FeatureError::SharedMemory("cannot share an empty weight array".to_string())
            })?;

            // SAFETY: fresh anonymous mapping, no existing memory is aliased.
            let ptr = unsafe {
                mmap_anonymous(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                )
            }
            .map_err(|e| FeatureError::SharedMemory(format!("mmap failed: {e}")))?;

            let region = SharedRegion {
                ptr,
                len: weights.len(),
            };
            for (dst, src) in region.as_slice().iter().zip(weights) {
                dst.store(src.load());
            }
            Ok(region)
        }

        pub(super) fn as_slice(&self) -> &[AtomicWeight] {
            // SAFETY: the mapping is page aligned, zero initialised and holds
            // `len` cells; an all-zero AtomicU32 is a valid 0.0 weight.
            unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const AtomicWeight, self.len) }
        }
    }

    impl Drop for SharedRegion {
        fn drop(&mut self) {
            let bytes = self.len * std::mem::size_of::<AtomicWeight>();
            // SAFETY: ptr/bytes describe the mapping created in `copy_of`.
            if let Err(e) = unsafe { munmap(self.ptr, bytes) } {
                log::warn!("munmap of shared weights failed: {}", e);
            }
        }
    }

    // SAFETY: the region is only accessed through atomic cells.
    unsafe impl Send for SharedRegion {}
    unsafe impl Sync for SharedRegion {}
}

/// Flat weight array.
///
/// Clones made with [`DenseParameters::shallow_copy`] share the array;
/// [`DenseParameters::deep_copy`] duplicates it.
pub struct DenseParameters {
    buffer: Arc<DenseBuffer>,
    hash_bits: u32,
    feature_width_bits: u32,
    stride_shift: u32,
    weight_mask: u64,
}

impl fmt::Debug for DenseParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseParameters")
            .field("hash_bits", &self.hash_bits)
            .field("feature_width_bits", &self.feature_width_bits)
            .field("stride_shift", &self.stride_shift)
            .field("len", &self.as_slice().len())
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl DenseParameters {
    /// Zeroed store of `2^(hash_bits + feature_width_bits + stride_shift)` weights.
    pub fn new(hash_bits: u32, feature_width_bits: u32, stride_shift: u32) -> Self {
        let weight_mask = weight_mask_for(hash_bits, feature_width_bits, stride_shift);
        DenseParameters {
            buffer: Arc::new(DenseBuffer::zeroed((weight_mask as usize).wrapping_add(1))),
            hash_bits,
            feature_width_bits,
            stride_shift,
            weight_mask,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[AtomicWeight] {
        self.buffer.as_slice()
    }

    #[inline]
    pub fn cell(&self, index: u64) -> &AtomicWeight {
        &self.as_slice()[(index & self.weight_mask) as usize]
    }

    pub fn shallow_copy(&self) -> Self {
        DenseParameters {
            buffer: Arc::clone(&self.buffer),
            ..*self
        }
    }

    /// Independent heap copy.
    pub fn deep_copy(&self) -> Self {
        let copied: Box<[AtomicWeight]> =
            self.as_slice().iter().map(|w| AtomicWeight::new(w.load())).collect();
        DenseParameters {
            buffer: Arc::new(DenseBuffer::Heap(copied)),
            ..*self
        }
    }

    pub fn is_shared(&self) -> bool {
        #[cfg(unix)]
        {
            matches!(*self.buffer, DenseBuffer::Shared(_))
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Move the weights into an anonymous shared mapping so that forked
    /// worker processes update the same array. Other handles made with
    /// `shallow_copy` before this call keep the old array.
    #[cfg(unix)]
    pub fn share(&mut self) -> Result<()> {
        if self.is_shared() {
            return Ok(());
        }
        let region = shared::SharedRegion::copy_of(self.as_slice())?;
        self.buffer = Arc::new(DenseBuffer::Shared(region));
        log::info!(
            "Moved {} dense weights into shared memory",
            self.as_slice().len()
        );
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn share(&mut self) -> Result<()> {
        Err(crate::error::FeatureError::Unsupported(
            "shared weights are only available on unix targets".to_string(),
        ))
    }

    /// Iterator over the first cell of every stride slot.
    pub fn iter(&self) -> DenseIter<'_> {
        DenseIter {
            weights: self.as_slice(),
            current: 0,
            stride_shift: self.stride_shift,
        }
    }
}

impl WeightStore for DenseParameters {
    #[inline]
    fn get(&self, index: u64) -> f32 {
        self.cell(index).load()
    }

    #[inline]
    fn set(&self, index: u64, value: f32) {
        self.cell(index).store(value)
    }

    #[inline]
    fn update<F: FnOnce(f32) -> f32>(&self, index: u64, f: F) {
        self.cell(index).update(f)
    }

    fn hash_bits(&self) -> u32 {
        self.hash_bits
    }

    fn feature_width_bits(&self) -> u32 {
        self.feature_width_bits
    }

    fn stride_shift(&self) -> u32 {
        self.stride_shift
    }

    fn weight_mask(&self) -> u64 {
        self.weight_mask
    }

    fn not_null(&self) -> bool {
        !self.as_slice().is_empty()
    }

    fn set_default(&mut self, f: WeightInitFn) {
        let stride = 1usize << self.stride_shift;
        let stride_shift = self.stride_shift;
        self.as_slice()
            .par_chunks(stride)
            .enumerate()
            .for_each_init(
                || Vec::with_capacity(stride),
                |scratch: &mut Vec<f32>, (slot, cells)| {
                    scratch.clear();
                    scratch.extend(cells.iter().map(AtomicWeight::load));
                    f(scratch.as_mut_slice(), (slot as u64) << stride_shift);
                    for (cell, &value) in cells.iter().zip(scratch.iter()) {
                        cell.store(value);
                    }
                },
            );
    }

    fn set_zero(&self, offset: usize) {
        let stride = 1usize << self.stride_shift;
        if offset >= stride {
            return;
        }
        self.as_slice()
            .par_chunks(stride)
            .for_each(|cells| cells[offset].store(0.0));
    }
}

/// One stride slot seen by [`DenseIter`].
#[derive(Debug, Clone, Copy)]
pub struct WeightSlot<'a> {
    index: usize,
    stride_shift: u32,
    cells: &'a [AtomicWeight],
}

impl<'a> WeightSlot<'a> {
    /// Flat index of the slot's first cell.
    pub fn index(&self) -> u64 {
        self.index as u64
    }

    pub fn index_without_stride(&self) -> u64 {
        (self.index >> self.stride_shift) as u64
    }

    /// The slot's primary weight.
    pub fn value(&self) -> f32 {
        self.cells[0].load()
    }

    /// Cell `stride_index` of this slot.
    pub fn cell(&self, stride_index: usize) -> &'a AtomicWeight {
        &self.cells[stride_index]
    }

    pub fn cells(&self) -> &'a [AtomicWeight] {
        self.cells
    }
}

/// Walks a dense store one stride slot at a time.
pub struct DenseIter<'a> {
    weights: &'a [AtomicWeight],
    current: usize,
    stride_shift: u32,
}

impl<'a> DenseIter<'a> {
    /// Advance to the next slot whose primary weight is non-zero.
    pub fn next_non_zero(&mut self) -> Option<WeightSlot<'a>> {
        self.find(|slot| slot.value() != 0.0)
    }
}

impl<'a> Iterator for DenseIter<'a> {
    type Item = WeightSlot<'a>;

    fn next(&mut self) -> Option<WeightSlot<'a>> {
        let stride = 1usize << self.stride_shift;
        let cells = self.weights.get(self.current..self.current + stride)?;
        let slot = WeightSlot {
            index: self.current,
            stride_shift: self.stride_shift,
            cells,
        };
        self.current += stride;
        Some(slot)
    }
}
