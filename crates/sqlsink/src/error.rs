//! Error types for sqlsink
//!
//! Configuration problems surface from `configure`; batch-level problems are
//! absorbed by the batch driver and reported as a backoff.

use thiserror::Error;

/// Result type alias for sink operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Main error type for the sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Missing, conflicting or malformed configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The pool manager has no live pool
    #[error("connection pool is not initialized")]
    NotInitialized,

    /// Database or pool failure
    #[error(transparent)]
    Database(#[from] sqlsink_rdbc::Error),

    /// The generator reported an unsuccessful batch
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Upstream channel failure
    #[error("channel error: {0}")]
    Channel(String),

    /// Operation not allowed in the current lifecycle state
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Unrecoverable failure, surfaced after cleanup
    #[error("fatal sink error: {0}")]
    Fatal(String),
}

impl SinkError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    /// Whether this error is a configuration problem
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error ends the sink
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Fatal(_))
    }
}
