//! Error types for the headlens-core crate.

use thiserror::Error;

/// Top-level error type for profiler operations.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// Model inference failed for a sentence. Recovered by dropping the
    /// sentence; fatal only when too few sentences survive.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Fewer sentences survived extraction than the minimum viable count.
    #[error("Insufficient corpus: {survived} sentences survived extraction, need at least {required}")]
    InsufficientCorpus { survived: usize, required: usize },

    /// Flat or zero-variance input. Non-fatal for the pipeline, which
    /// proceeds with a logged warning; surfaced only where a caller asks
    /// for something the degenerate data cannot provide.
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    /// An attention matrix failed validation (shape, negativity, row sums).
    #[error("Invalid observation: {0}")]
    InvalidObservation(String),

    /// Requested cluster count exceeds the number of heads.
    #[error("Cluster count {k} exceeds head count {heads}")]
    ClusterCount { k: usize, heads: usize },

    /// A pipeline stage failed inside the cache; fanned out to every waiter
    /// on the same key. The key is not poisoned and may be retried.
    #[error("Cache compute error: {0}")]
    CacheCompute(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ProfilerError {
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn invalid_observation(msg: impl Into<String>) -> Self {
        Self::InvalidObservation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProfilerError>;
