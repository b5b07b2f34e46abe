//! Python bindings.
//!
//! Build: `maturin develop --release --features python`
//! Usage in Python: `import fast_features`

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashSet;
use pyo3::exceptions::{PyIndexError, PyValueError};
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::constants::NamespaceIndex;
use crate::error::FeatureError;
use crate::example::{ExamplePredict, Interaction};
use crate::flatten::flatten_features;
use crate::hash::{self, HashMode};
use crate::interactions::{self, is_interaction_ns, GenerateMode, InteractionsGenerator};
use crate::interactions_predict::{AuditCollector, InteractionCache};
use crate::ngram::KSkipNgramTransformer;
use crate::predict::{foreach_feature_audit, inline_predict};
use crate::weights::{Parameters, WeightStore};

impl From<FeatureError> for PyErr {
    fn from(err: FeatureError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// `{namespace: {feature: value}}`. Sorted maps keep the traversal order stable.
type PyExample = BTreeMap<String, BTreeMap<String, f32>>;

fn term_to_string(term: &[NamespaceIndex]) -> String {
    String::from_utf8_lossy(term).into_owned()
}

// ============================================================================
// Hash functions
// ============================================================================

/// 32-bit MurmurHash3 of `data`, widened to u64.
///
/// Args:
///     data: bytes to hash, as a string
///     seed: hash seed
#[pyfunction]
#[pyo3(signature = (data, seed=0))]
pub fn uniform_hash(data: &str, seed: u64) -> u64 {
    hash::uniform_hash(data.as_bytes(), seed)
}

/// Namespace salt for `name`.
#[pyfunction]
#[pyo3(signature = (name, seed=0))]
pub fn hash_namespace(name: &str, seed: u64) -> u64 {
    hash::hash_namespace(name, seed)
}

/// Hash one feature name into a namespace.
///
/// Args:
///     name: feature name
///     namespace_hash: salt from `hash_namespace`
///     mode: "strings" (decimal names are added to the salt) or "all"
///
/// Returns:
///     Unmasked feature index.
#[pyfunction]
#[pyo3(signature = (name, namespace_hash, mode="strings"))]
pub fn hash_feature(name: &str, namespace_hash: u64, mode: &str) -> PyResult<u64> {
    let mode = HashMode::from_name(mode)?;
    Ok(hash::hash_feature_static(name, namespace_hash, mode))
}

/// Batch version of `hash_feature` (parallel via Rayon).
///
/// Example:
///     hash_feature_batch(["age", "city"], hash_namespace("user"))
#[pyfunction]
#[pyo3(signature = (names, namespace_hash, mode="strings"))]
pub fn hash_feature_batch(names: Vec<String>, namespace_hash: u64, mode: &str) -> PyResult<Vec<u64>> {
    let mode = HashMode::from_name(mode)?;
    Ok(names
        .into_par_iter()
        .map(|name| hash::hash_feature_static(&name, namespace_hash, mode))
        .collect())
}

/// Index of a string-valued feature: `value` hashed with the hash of `name` as seed.
#[pyfunction]
pub fn chain_hash_feature(name: &str, value: &str, namespace_hash: u64) -> u64 {
    hash::chain_hash_feature(name, value, namespace_hash)
}

// ============================================================================
// Interaction compilation
// ============================================================================

/// Expand interaction templates against a set of namespaces.
///
/// Args:
///     terms: templates such as "ab", "a:" or "::"; ':' matches any namespace
///     namespaces: namespace ids, one character each
///     permutations: generate ordered sequences instead of combinations
///     leave_duplicates: keep terms that are permutations of each other
///
/// Returns:
///     Concrete terms, sorted.
///
/// Example:
///     compile_interactions(["::"], "ab")  # -> ["aa", "ab", "bb"]
#[pyfunction]
#[pyo3(signature = (terms, namespaces, permutations=false, leave_duplicates=false))]
pub fn compile_interactions(
    terms: Vec<String>,
    namespaces: &str,
    permutations: bool,
    leave_duplicates: bool,
) -> Vec<String> {
    let terms: Vec<Interaction> = terms.iter().map(|t| t.as_bytes().to_vec()).collect();
    let namespaces: BTreeSet<NamespaceIndex> = namespaces
        .bytes()
        .filter(|&ns| is_interaction_ns(ns))
        .collect();
    interactions::compile_interactions(
        &terms,
        &namespaces,
        GenerateMode::from_permutations(permutations),
        leave_duplicates,
    )
    .iter()
    .map(|term| term_to_string(term))
    .collect()
}

// ============================================================================
// FeatureHasher
// ============================================================================

/// Hashed feature space with interaction expansion and a weight table.
///
/// Python usage:
///   hasher = FeatureHasher('{"bit_precision": 20, "interactions": ["ab"]}')
///   indices, values = hasher.flatten({"a": {"x": 1.0}, "b": {"y": 2.0}})
///   hasher.set_weight(indices[0], 0.5)
///   score = hasher.predict({"a": {"x": 1.0}, "b": {"y": 2.0}})
#[pyclass]
pub struct FeatureHasher {
    config: EngineConfig,
    terms: Vec<Interaction>,
    generator: InteractionsGenerator,
    ignore_linear: AHashSet<NamespaceIndex>,
    ngrams: Option<KSkipNgramTransformer>,
    weights: Parameters,
    cache: InteractionCache,
}

impl FeatureHasher {
    fn build_example(&mut self, example: &PyExample) -> ExamplePredict {
        let mut ec = ExamplePredict::new(self.config.hash_seed);
        let mode = self.config.hash_mode;
        let audit = self.config.audit;
        for (namespace, features) in example {
            let fs = ec.feature_group_by_name(namespace);
            for (name, &value) in features {
                let index = hash::hash_feature_static(name, fs.namespace_hash, mode);
                fs.add_feature_raw(index, value * fs.namespace_value);
                if audit {
                    fs.add_audit_string(name);
                }
            }
        }
        if let Some(ngrams) = self.ngrams.as_mut() {
            ngrams.generate_grams(&mut ec);
        }
        self.generator
            .update_interactions_if_new_namespace_seen(&self.terms, ec.feature_space());
        ec.interactions = Arc::new(self.generator.generated_interactions.clone());
        ec
    }

    fn check_index(&self, index: u64) -> PyResult<()> {
        if index > self.weights.weight_mask() {
            return Err(PyIndexError::new_err(format!(
                "weight index {} out of range (mask {})",
                index,
                self.weights.weight_mask()
            )));
        }
        Ok(())
    }
}

#[pymethods]
impl FeatureHasher {
    /// Create a hasher from a JSON configuration.
    ///
    /// Args:
    ///     config_json: JSON object; missing fields take their defaults
    #[new]
    #[pyo3(signature = (config_json="{}"))]
    fn new(config_json: &str) -> PyResult<Self> {
        let config = EngineConfig::from_json_str(config_json)?;
        let ngrams = config.build_ngram_transformer()?;
        log::info!(
            "FeatureHasher: {} bits, {} interaction templates, {} weights",
            config.bit_precision,
            config.interactions.len(),
            if config.sparse_weights { "sparse" } else { "dense" }
        );
        Ok(FeatureHasher {
            terms: config.parse_interactions(),
            generator: config.interactions_generator(),
            ignore_linear: config.ignore_linear_set(),
            weights: config.build_parameters(),
            cache: InteractionCache::new(),
            ngrams,
            config,
        })
    }

    /// Concrete interaction terms compiled so far.
    #[getter]
    fn interactions(&self) -> Vec<String> {
        self.generator
            .generated_interactions
            .iter()
            .map(|term| term_to_string(term))
            .collect()
    }

    /// Flatten one example into sorted, collision-merged features.
    ///
    /// Args:
    ///     example: {namespace: {feature: value}}
    ///
    /// Returns:
    ///     (indices, values)
    fn flatten(&mut self, example: PyExample) -> (Vec<u64>, Vec<f32>) {
        let mut ec = self.build_example(&example);
        let fs = flatten_features(
            &mut ec,
            &self.ignore_linear,
            self.config.permutations,
            self.config.bit_precision,
            self.config.parse_mask(),
            &mut self.cache,
        );
        (fs.indices().to_vec(), fs.values().to_vec())
    }

    /// Batch version of `flatten` (parallel via Rayon).
    fn flatten_batch(&mut self, examples: Vec<PyExample>) -> Vec<(Vec<u64>, Vec<f32>)> {
        let built: Vec<ExamplePredict> = examples.iter().map(|ex| self.build_example(ex)).collect();
        let ignore_linear = &self.ignore_linear;
        let permutations = self.config.permutations;
        let hash_bits = self.config.bit_precision;
        let parse_mask = self.config.parse_mask();
        built
            .into_par_iter()
            .map_init(InteractionCache::new, |cache, mut ec| {
                let fs = flatten_features(
                    &mut ec,
                    ignore_linear,
                    permutations,
                    hash_bits,
                    parse_mask,
                    cache,
                );
                (fs.indices().to_vec(), fs.values().to_vec())
            })
            .collect()
    }

    /// Linear score of one example against the weight table.
    #[pyo3(signature = (example, initial=0.0))]
    fn predict(&mut self, example: PyExample, initial: f32) -> f32 {
        let ec = self.build_example(&example);
        inline_predict(
            &self.weights,
            &self.ignore_linear,
            &ec.interactions,
            self.config.permutations,
            &ec,
            &mut self.cache,
            initial,
        )
    }

    /// Batch version of `predict` (parallel via Rayon).
    #[pyo3(signature = (examples, initial=0.0))]
    fn predict_batch(&mut self, examples: Vec<PyExample>, initial: f32) -> Vec<f32> {
        let built: Vec<ExamplePredict> = examples.iter().map(|ex| self.build_example(ex)).collect();
        let weights = &self.weights;
        let ignore_linear = &self.ignore_linear;
        let permutations = self.config.permutations;
        built
            .par_iter()
            .map_init(InteractionCache::new, |cache, ec| {
                inline_predict(weights, ignore_linear, &ec.interactions, permutations, ec, cache, initial)
            })
            .collect()
    }

    /// Every feature of an example with its audit name.
    ///
    /// Returns:
    ///     list of (name, value, weight_index), e.g. ("a^x*b^y", 2.0, 1234)
    fn audit(&mut self, example: PyExample) -> Vec<(String, f32, u64)> {
        let ec = self.build_example(&example);
        let mut collector = AuditCollector::new();
        foreach_feature_audit(
            &ec,
            &self.ignore_linear,
            &ec.interactions,
            self.config.permutations,
            self.config.bit_precision,
            &mut collector,
            &mut self.cache,
        );
        collector.features
    }

    fn get_weight(&self, index: u64) -> PyResult<f32> {
        self.check_index(index)?;
        Ok(self.weights.get(index))
    }

    fn set_weight(&self, index: u64, value: f32) -> PyResult<()> {
        self.check_index(index)?;
        self.weights.set(index, value);
        Ok(())
    }

    /// Zero stride slot `offset` of every weight.
    #[pyo3(signature = (offset=0))]
    fn zero_weights(&self, offset: usize) {
        self.weights.set_zero(offset);
    }

    fn __repr__(&self) -> String {
        format!(
            "FeatureHasher(bits={}, templates={}, sparse={})",
            self.config.bit_precision,
            self.terms.len(),
            self.weights.is_sparse()
        )
    }
}
