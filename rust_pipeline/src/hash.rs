//! Deterministic hashing primitives.
//!
//! Every function here is pure and must produce identical output across runs
//! and platforms: saved weights are addressed through these hashes.
//!
//! - [`uniform_hash`]: MurmurHash3 (x86, 32-bit) over the raw bytes, seeded
//!   with the low 32 bits of the seed. Used for namespace and feature names.
//! - [`hashstring`]: like `uniform_hash`, but an all-digit name is parsed as an
//!   integer and added to the seed, keeping integer feature spaces contiguous.
//! - [`FnvHasher`]: 32-bit FNV-style streaming combiner used to fold several
//!   feature indices into one interaction index.

use crate::constants::{
    FeatureIndex, NamespaceIndex, DEFAULT_NAMESPACE, DEFAULT_NAMESPACE_STR, WILDCARD_NAMESPACE,
    WILDCARD_NAMESPACE_STR,
};
use crate::error::{FeatureError, Result};

const MURMUR_C1: u32 = 0xcc9e_2d51;
const MURMUR_C2: u32 = 0x1b87_3593;

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// MurmurHash3 x86_32.
pub fn murmurhash3_x86_32(data: &[u8], seed: u32) -> u32 {
    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);

    for block in &mut blocks {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(MURMUR_C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(MURMUR_C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    let mut k1: u32 = 0;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(MURMUR_C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(MURMUR_C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    fmix32(h1)
}

/// Hash of `data` seeded with the low 32 bits of `seed`.
#[inline]
pub fn uniform_hash(data: &[u8], seed: u64) -> u64 {
    murmurhash3_x86_32(data, seed as u32) as u64
}

#[inline]
fn is_hash_whitespace(b: u8) -> bool {
    // Signed-char semantics: bytes >= 0x80 are never whitespace.
    b <= 0x20
}

/// Hash that maps all-digit strings to `value + seed`.
///
/// Leading and trailing whitespace is ignored. An empty string hashes to `seed`.
pub fn hashstring(data: &[u8], seed: u64) -> u64 {
    let start = data
        .iter()
        .position(|&b| !is_hash_whitespace(b))
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|&b| !is_hash_whitespace(b))
        .map_or(start, |p| p + 1);
    let trimmed = &data[start..end];

    let mut ret: u64 = 0;
    for &b in trimmed {
        if b.is_ascii_digit() {
            ret = ret.wrapping_mul(10).wrapping_add((b - b'0') as u64);
        } else {
            return uniform_hash(trimmed, seed);
        }
    }
    ret.wrapping_add(seed)
}

/// Selectable feature-name hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashMode {
    /// [`hashstring`]: integers are added to the seed.
    #[default]
    Strings,
    /// [`uniform_hash`] for every name.
    All,
}

impl HashMode {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "strings" => Ok(HashMode::Strings),
            "all" => Ok(HashMode::All),
            other => Err(FeatureError::UnknownHashMode(other.to_string())),
        }
    }

    #[inline]
    pub fn hash(self, data: &[u8], seed: u64) -> u64 {
        match self {
            HashMode::Strings => hashstring(data, seed),
            HashMode::All => uniform_hash(data, seed),
        }
    }
}

// ============================================================================
// Namespace hashing
// ============================================================================

/// Hash of a namespace name. The seed is the global hash seed.
#[inline]
pub fn hash_namespace(name: &str, seed: u64) -> u64 {
    uniform_hash(name.as_bytes(), seed)
}

/// Legacy alias that accepts a hash-mode name. The mode is ignored: namespaces
/// are always hashed with [`uniform_hash`] and seed 0.
#[inline]
pub fn hash_namespace_static(name: &str, _mode: &str) -> u64 {
    hash_namespace(name, 0)
}

/// Namespace id for a namespace name.
///
/// The default (`" "`) and wildcard (`":"`) names map to their reserved ids
/// regardless of seed; any other name takes the low byte of its hash.
pub fn namespace_string_to_index(name: &str, seed: u64) -> NamespaceIndex {
    match name {
        DEFAULT_NAMESPACE_STR => DEFAULT_NAMESPACE,
        WILDCARD_NAMESPACE_STR => WILDCARD_NAMESPACE,
        _ => hash_namespace(name, seed) as NamespaceIndex,
    }
}

// ============================================================================
// Feature hashing
// ============================================================================

/// Hash a string feature name salted with its namespace hash.
#[inline]
pub fn hash_feature(name: &str, ns_hash: u64) -> FeatureIndex {
    uniform_hash(name.as_bytes(), ns_hash)
}

/// Integer feature keys are offset by the namespace hash, never hashed.
#[inline]
pub fn hash_feature_index(index: FeatureIndex, ns_hash: u64) -> FeatureIndex {
    index.wrapping_add(ns_hash)
}

/// Hash a feature name with an explicitly chosen [`HashMode`].
#[inline]
pub fn hash_feature_static(name: &str, ns_hash: u64, mode: HashMode) -> FeatureIndex {
    mode.hash(name.as_bytes(), ns_hash)
}

/// Hash of a string-valued feature: `hash(value, hash_feature(name, ns_hash))`.
#[inline]
pub fn chain_hash_feature(name: &str, value: &str, ns_hash: u64) -> FeatureIndex {
    uniform_hash(value.as_bytes(), hash_feature(name, ns_hash))
}

/// Chain hash for an integer-keyed feature with a string value.
#[inline]
pub fn chain_hash_feature_index(index: FeatureIndex, value: &str, ns_hash: u64) -> FeatureIndex {
    uniform_hash(value.as_bytes(), hash_feature_index(index, ns_hash))
}

/// Chain hash with an explicitly chosen [`HashMode`] for both passes.
#[inline]
pub fn chain_hash_static(name: &str, value: &str, ns_hash: u64, mode: HashMode) -> FeatureIndex {
    mode.hash(value.as_bytes(), mode.hash(name.as_bytes(), ns_hash))
}

// ============================================================================
// Streaming interaction hash
// ============================================================================

const FNV_32_PRIME: u32 = 16_777_619;
const FNV_32_OFFSET: u32 = 2_166_136_261;

/// Immutable 32-bit streaming hash.
///
/// [`FnvHasher::hash`] returns a new state and leaves `self` untouched, so a
/// state can be forked at each nesting level of an interaction walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnvHasher {
    partial_hash: u32,
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FnvHasher {
    #[inline]
    pub const fn new() -> Self {
        FnvHasher {
            partial_hash: FNV_32_OFFSET,
        }
    }

    #[inline]
    #[must_use]
    pub const fn hash(self, data: u32) -> Self {
        FnvHasher {
            partial_hash: self.partial_hash.wrapping_mul(FNV_32_PRIME) ^ data,
        }
    }

    #[inline]
    pub fn hash_in_place(&mut self, data: u32) {
        self.partial_hash = self.partial_hash.wrapping_mul(FNV_32_PRIME) ^ data;
    }

    #[inline]
    pub const fn full_hash(self) -> u32 {
        self.partial_hash
    }

    /// XOR-fold the hash down to `bits` bits.
    #[inline]
    pub const fn truncated_hash(self, bits: u32) -> u32 {
        if bits >= 32 {
            return self.partial_hash;
        }
        let mask = (1u32 << bits) - 1;
        let upper_bits = self.partial_hash >> bits;
        (self.partial_hash ^ upper_bits) & mask
    }
}
