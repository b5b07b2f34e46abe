//! Sparse weight store: a map from hash index to lazily allocated blocks.
//!
//! A block holds every weight that shares the high `hash_bits` of an index,
//! i.e. `2^(feature_width_bits + stride_shift)` cells. Block creation goes
//! through DashMap's shard lock, so concurrent writers never race on
//! insertion; reads of existing blocks take only a shared shard lock.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use super::{weight_mask_for, AtomicWeight, WeightInitFn, WeightStore};
use crate::error::{FeatureError, Result};

type Block = Arc<[AtomicWeight]>;
type BlockMap = DashMap<u64, Block, ahash::RandomState>;

pub struct SparseParameters {
    map: Arc<BlockMap>,
    default_func: Option<WeightInitFn>,
    hash_bits: u32,
    feature_width_bits: u32,
    stride_shift: u32,
    weight_mask: u64,
}

impl fmt::Debug for SparseParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseParameters")
            .field("hash_bits", &self.hash_bits)
            .field("feature_width_bits", &self.feature_width_bits)
            .field("stride_shift", &self.stride_shift)
            .field("blocks", &self.map.len())
            .field("has_default", &self.default_func.is_some())
            .finish()
    }
}

impl SparseParameters {
    pub fn new(hash_bits: u32, feature_width_bits: u32, stride_shift: u32) -> Self {
        SparseParameters {
            map: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            default_func: None,
            hash_bits,
            feature_width_bits,
            stride_shift,
            weight_mask: weight_mask_for(hash_bits, feature_width_bits, stride_shift),
        }
    }

    /// A handle on the same block map and default function.
    pub fn shallow_copy(&self) -> Self {
        SparseParameters {
            map: Arc::clone(&self.map),
            default_func: self.default_func.clone(),
            ..*self
        }
    }

    /// Sparse stores cannot be placed in shared memory.
    pub fn share(&mut self) -> Result<()> {
        Err(FeatureError::Unsupported(
            "sparse weights cannot be shared between processes".to_string(),
        ))
    }

    #[inline]
    fn block_shift(&self) -> u32 {
        self.feature_width_bits + self.stride_shift
    }

    /// `(hash_index, offset inside the block)` of a weight index.
    #[inline]
    fn split(&self, index: u64) -> (u64, usize) {
        let masked = index & self.weight_mask;
        let shift = self.block_shift();
        (masked >> shift, (masked & ((1u64 << shift) - 1)) as usize)
    }

    fn allocate_block(&self, hash_index: u64) -> Block {
        let shift = self.block_shift();
        let stride = 1usize << self.stride_shift;
        let mut values = vec![0.0f32; 1usize << shift];
        if let Some(init) = &self.default_func {
            for (width, slot) in values.chunks_mut(stride).enumerate() {
                let weight_index = (hash_index << shift) + ((width as u64) << self.stride_shift);
                init(slot, weight_index);
            }
        }
        log::trace!("Allocated sparse weight block {}", hash_index);
        values.into_iter().map(AtomicWeight::new).collect()
    }

    /// The block of `hash_index`, allocated on a miss.
    fn block(&self, hash_index: u64) -> Block {
        if let Some(block) = self.map.get(&hash_index) {
            return Arc::clone(block.value());
        }
        let entry = self
            .map
            .entry(hash_index)
            .or_insert_with(|| self.allocate_block(hash_index));
        Arc::clone(entry.value())
    }

    /// Number of allocated blocks.
    pub fn block_count(&self) -> usize {
        self.map.len()
    }

    /// Snapshot of the allocated blocks, ordered by hash index.
    pub fn blocks(&self) -> Vec<(u64, Block)> {
        let mut out: Vec<(u64, Block)> = self
            .map
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        out.sort_unstable_by_key(|(hash_index, _)| *hash_index);
        out
    }

    /// `(flat weight index, value)` of every stride slot in allocated blocks.
    pub fn iter_weights(&self) -> impl Iterator<Item = (u64, f32)> + '_ {
        let shift = self.block_shift();
        let stride = 1usize << self.stride_shift;
        self.blocks().into_iter().flat_map(move |(hash_index, block)| {
            (0..block.len()).step_by(stride).map(move |offset| {
                ((hash_index << shift) + offset as u64, block[offset].load())
            })
        })
    }
}

impl WeightStore for SparseParameters {
    /// Reads of an unallocated block return 0 unless a default function is
    /// set, in which case the block is allocated and initialised first.
    fn get(&self, index: u64) -> f32 {
        let (hash_index, offset) = self.split(index);
        if let Some(block) = self.map.get(&hash_index) {
            return block[offset].load();
        }
        if self.default_func.is_none() {
            return 0.0;
        }
        self.block(hash_index)[offset].load()
    }

    fn set(&self, index: u64, value: f32) {
        let (hash_index, offset) = self.split(index);
        self.block(hash_index)[offset].store(value);
    }

    fn update<F: FnOnce(f32) -> f32>(&self, index: u64, f: F) {
        let (hash_index, offset) = self.split(index);
        self.block(hash_index)[offset].update(f);
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
        self.weight_mask > 0
    }

    /// Applies to blocks allocated from now on; existing blocks keep their values.
    fn set_default(&mut self, f: WeightInitFn) {
        self.default_func = Some(f);
    }

    fn set_zero(&self, offset: usize) {
        let stride = 1usize << self.stride_shift;
        if offset >= stride {
            return;
        }
        self.blocks().par_iter().for_each(|(_, block)| {
            for slot in block.chunks(stride) {
                slot[offset].store(0.0);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn misses_read_zero_without_allocating() {
        let w = SparseParameters::new(10, 1, 2);
        assert_eq!(w.get(12345), 0.0);
        assert_eq!(w.block_count(), 0);
        w.set(12345, 2.0);
        assert_eq!(w.get(12345), 2.0);
        assert_eq!(w.block_count(), 1);
    }

    #[test_log::test]
    fn one_block_covers_width_times_stride() {
        let w = SparseParameters::new(10, 1, 2);
        // same hash index 3, all 8 cells
        for cell in 0..8u64 {
            w.set((3 << 3) + cell, cell as f32);
        }
        assert_eq!(w.block_count(), 1);
        w.set(4 << 3, 1.0);
        assert_eq!(w.block_count(), 2);
        assert_eq!(w.get((3 << 3) + 5), 5.0);
    }

    #[test_log::test]
    fn default_function_runs_once_per_slot() {
        let mut w = SparseParameters::new(8, 1, 1);
        w.set_default(Arc::new(|slot: &mut [f32], index: u64| {
            slot[0] = index as f32;
            slot[1] = -1.0;
        }));
        // hash index 5, width slot 1, stride cell 0: flat (5 << 2) + (1 << 1)
        assert_eq!(w.get(22), 22.0);
        assert_eq!(w.get(23), -1.0);
        assert_eq!(w.get(20), 20.0);
        assert_eq!(w.block_count(), 1);
    }

    #[test_log::test]
    fn default_function_leaves_written_blocks_alone() {
        let mut w = SparseParameters::new(8, 0, 1);
        w.set(14, 3.0);
        w.set(15, -2.0);
        w.set_default(Arc::new(|slot: &mut [f32], _index: u64| {
            slot[0] = 1.0;
            slot[1] = 1.0;
        }));
        assert_eq!(w.get(14), 3.0);
        assert_eq!(w.get(15), -2.0);
        assert_eq!(w.get(18), 1.0);
        assert_eq!(w.get(19), 1.0);
        assert_eq!(w.block_count(), 2);
    }

    #[test_log::test]
    fn indices_wrap_and_copies_share_blocks() {
        let w = SparseParameters::new(4, 0, 0);
        let alias = w.shallow_copy();
        w.set(3, 1.5);
        assert_eq!(alias.get(3 + w.weight_mask() + 1), 1.5);
    }

    #[test_log::test]
    fn iteration_and_set_zero() {
        let w = SparseParameters::new(6, 0, 1);
        w.set(10, 1.0);
        w.set(11, 2.0);
        w.set(40, 3.0);
        let weights: Vec<(u64, f32)> = w.iter_weights().collect();
        assert_eq!(weights, vec![(10, 1.0), (40, 3.0)]);

        w.set_zero(1);
        assert_eq!(w.get(11), 0.0);
        assert_eq!(w.get(10), 1.0);
    }

    #[test_log::test]
    fn sharing_is_unsupported() {
        let mut w = SparseParameters::new(4, 0, 0);
        assert!(matches!(w.share(), Err(FeatureError::Unsupported(_))));
    }

    #[test_log::test]
    fn concurrent_writers_allocate_each_block_once() {
        let w = SparseParameters::new(12, 0, 0);
        (0..4096u64).into_par_iter().for_each(|i| w.set(i % 64, 1.0));
        assert_eq!(w.block_count(), 64);
    }
}
