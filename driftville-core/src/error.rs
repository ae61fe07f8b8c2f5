//! Error types for the Driftville core library.

use thiserror::Error;

/// Top-level error type for all core operations.
#[derive(Error, Debug)]
pub enum DriftvilleError {
    /// Configuration could not be parsed or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A schedule slot violates `end > start` or carries an unparseable time.
    #[error("Invalid schedule slot for '{agent}': {reason}")]
    InvalidSchedule {
        /// Agent whose schedule was rejected.
        agent: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The stage pipeline description failed validation at startup.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// The embedding service failed or returned a malformed batch.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, DriftvilleError>;
