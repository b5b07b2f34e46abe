//! Hashed feature spaces for online linear learners.
//!
//! An example is a set of namespaces, each holding parallel arrays of
//! feature values and hashed indices. Interaction terms such as `ab` or
//! `::` expand at prediction time into the hashed cross products of those
//! namespaces, without materialising them.
//!
//! Components:
//!   - hash: MurmurHash3 feature and namespace hashing, FNV interaction hash
//!   - feature_group / example: per-namespace features and the example container
//!   - interactions: wildcard expansion and interaction-term compilation
//!   - interactions_predict: the zero-allocation interaction kernel
//!   - predict / flatten: linear + interaction traversal, prediction, flattening
//!   - weights: dense (optionally process-shared) and sparse weight stores
//!   - ngram: k-skip n-gram features
//!   - builder / stash: scoped edits restored on every exit path
//!   - config: JSON engine configuration
//!
//! Build the Python module: `maturin develop --release --features python`
//! Usage in Python: `import fast_features`

pub mod builder;
pub mod config;
pub mod constants;
pub mod error;
pub mod example;
pub mod feature_group;
pub mod flatten;
pub mod hash;
pub mod interactions;
pub mod interactions_predict;
pub mod ngram;
pub mod predict;
pub mod stash;
pub mod unique_sort;
pub mod weights;

#[cfg(feature = "python")]
mod python;

pub use config::EngineConfig;
pub use error::{FeatureError, Result};
pub use example::{ExamplePredict, FeatureGroups, Interaction};
pub use feature_group::{features_dot_product, AuditStrings, Features};
pub use interactions::{compile_interactions, GenerateMode, InteractionsGenerator};
pub use interactions_predict::{
    generate_interactions, generate_interactions_audit, AuditCollector, InteractionCache,
    InteractionSink,
};
pub use predict::{foreach_feature, inline_predict, inline_predict_with_count};
pub use weights::{DenseParameters, Parameters, SparseParameters, WeightStore};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// fast_features: Rust-accelerated feature hashing and interactions.
///
/// Contents:
///   - uniform_hash / hash_namespace / hash_feature / chain_hash_feature
///   - compile_interactions: wildcard template expansion
///   - FeatureHasher: flatten, predict and audit examples
#[cfg(feature = "python")]
#[pymodule]
fn fast_features(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Hashing
    m.add_function(wrap_pyfunction!(python::uniform_hash, m)?)?;
    m.add_function(wrap_pyfunction!(python::hash_namespace, m)?)?;
    m.add_function(wrap_pyfunction!(python::hash_feature, m)?)?;
    m.add_function(wrap_pyfunction!(python::hash_feature_batch, m)?)?;
    m.add_function(wrap_pyfunction!(python::chain_hash_feature, m)?)?;

    // Interactions
    m.add_function(wrap_pyfunction!(python::compile_interactions, m)?)?;

    m.add_class::<python::FeatureHasher>()?;

    Ok(())
}
