//! Unified error types for Tally

use thiserror::Error;

/// Unified error type for all Tally operations
#[derive(Error, Debug)]
pub enum TallyError {
    // Collector errors
    #[error("Collector request failed: {0}")]
    Network(String),

    #[error("Collector returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Circuit breaker '{0}' is OPEN and does not permit further calls")]
    CallNotPermitted(String),

    // Coordination store errors
    #[error("Coordination store error: {0}")]
    Coordination(String),

    #[error("Coordination store did not answer within {0}ms")]
    CoordinationTimeout(u64),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Faults that should never happen but must not escape
    #[error("Unexpected fault: {0}")]
    Unexpected(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl TallyError {
    /// Whether the failure came from talking to the collector
    pub fn is_transient(&self) -> bool {
        matches!(self, TallyError::Network(_) | TallyError::Remote { .. })
    }
}

/// Result type alias using TallyError
pub type Result<T> = std::result::Result<T, TallyError>;
