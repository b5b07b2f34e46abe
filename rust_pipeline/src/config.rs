//! Engine configuration.
//!
//! Loaded from JSON, e.g.
//!
//! ```json
//! { "bit_precision": 20, "interactions": ["ab", "::"], "ignore_linear": ["a"] }
//! ```
//!
//! Missing fields take their defaults.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::constants::NamespaceIndex;
use crate::error::{FeatureError, Result};
use crate::example::Interaction;
use crate::hash::HashMode;
use crate::interactions::{GenerateMode, InteractionsGenerator};
use crate::ngram::KSkipNgramTransformer;
use crate::weights::Parameters;

/// Largest supported `bit_precision + feature_width_bits + stride_shift`.
const MAX_TOTAL_BITS: u32 = 48;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub hash_seed: u64,
    pub hash_mode: HashMode,
    /// Hash bits of a weight index.
    pub bit_precision: u32,
    pub feature_width_bits: u32,
    pub stride_shift: u32,
    pub sparse_weights: bool,
    /// Expand wildcards (and self-interactions) as ordered sequences.
    pub permutations: bool,
    pub leave_duplicate_interactions: bool,
    /// Interaction terms, one namespace per byte; `:` is the wildcard.
    pub interactions: Vec<String>,
    /// Namespaces whose linear terms are skipped, one per byte.
    pub ignore_linear: Vec<String>,
    pub ngrams: Vec<String>,
    pub skips: Vec<String>,
    pub audit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            hash_seed: 0,
            hash_mode: HashMode::Strings,
            bit_precision: 18,
            feature_width_bits: 0,
            stride_shift: 0,
            sparse_weights: false,
            permutations: false,
            leave_duplicate_interactions: false,
            interactions: Vec::new(),
            ignore_linear: Vec::new(),
            ngrams: Vec::new(),
            skips: Vec::new(),
            audit: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let total = self.bit_precision + self.feature_width_bits + self.stride_shift;
        if self.bit_precision == 0 || total > MAX_TOTAL_BITS {
            return Err(FeatureError::InvalidConfig(format!(
                "bit_precision {} + feature_width_bits {} + stride_shift {} must be in 1..={}",
                self.bit_precision, self.feature_width_bits, self.stride_shift, MAX_TOTAL_BITS
            )));
        }
        if let Some(term) = self.interactions.iter().find(|t| t.is_empty()) {
            return Err(FeatureError::InvalidConfig(format!(
                "empty interaction term {term:?}"
            )));
        }
        Ok(())
    }

    /// Interaction strings decoded byte-wise into namespace ids.
    pub fn parse_interactions(&self) -> Vec<Interaction> {
        self.interactions
            .iter()
            .map(|term| term.as_bytes().to_vec())
            .collect()
    }

    pub fn ignore_linear_set(&self) -> AHashSet<NamespaceIndex> {
        self.ignore_linear
            .iter()
            .flat_map(|s| s.as_bytes().iter().copied())
            .collect()
    }

    #[inline]
    pub fn parse_mask(&self) -> u64 {
        (1u64 << self.bit_precision) - 1
    }

    pub fn generate_mode(&self) -> GenerateMode {
        GenerateMode::from_permutations(self.permutations)
    }

    pub fn interactions_generator(&self) -> InteractionsGenerator {
        InteractionsGenerator::new(self.generate_mode(), self.leave_duplicate_interactions)
    }

    pub fn build_parameters(&self) -> Parameters {
        log::debug!(
            "Allocating {} weights: 2^({} + {} + {})",
            if self.sparse_weights { "sparse" } else { "dense" },
            self.bit_precision,
            self.feature_width_bits,
            self.stride_shift
        );
        Parameters::new(
            self.sparse_weights,
            self.bit_precision,
            self.feature_width_bits,
            self.stride_shift,
        )
    }

    /// `None` when no n-grams are configured.
    pub fn build_ngram_transformer(&self) -> Result<Option<KSkipNgramTransformer>> {
        if self.ngrams.is_empty() {
            if !self.skips.is_empty() {
                log::warn!("skips have no effect without ngrams");
            }
            return Ok(None);
        }
        KSkipNgramTransformer::build(&self.ngrams, &self.skips).map(Some)
    }
}
