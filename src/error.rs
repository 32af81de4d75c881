//! Crate-wide error type.
//!
//! Convergence problems are deliberately NOT part of this enum: a fit that
//! mixed poorly still returns draws, with warnings attached to the sample set
//! (see [`crate::diagnostics::ConvergenceWarning`]). Only conditions that make
//! the draws unusable are errors.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or empty observation set, or an invalid model specification.
    #[error("validation error: {0}")]
    Validation(String),

    /// Data does not match the fields/types a model specification declares.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// External sampling engine failure, or the quadratic approximation
    /// failed to locate a usable posterior mode.
    #[error("sampler error: {0}")]
    Sampler(String),

    /// The wall-clock deadline passed before all chains finished. No partial
    /// sample set is returned.
    #[error("sampler timed out after {seconds}s")]
    SamplerTimeout { seconds: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
