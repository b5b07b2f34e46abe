//! Crate-wide error type.
//!
//! Only conditions a caller can act on are reported here. Broken invariants
//! (unsorted input to a merge scan, mismatched audit state in `concat`) are
//! programmer errors and are caught by debug assertions instead.

/// Errors raised by the feature engine.
#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown hash mode: {0} (expected \"strings\" or \"all\")")]
    UnknownHashMode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FeatureError>;
