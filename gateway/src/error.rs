//! Error types for the accounting gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway process
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error (socket bind, send, receive)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Publisher or dead-letter sink could not be built
    #[error("publisher error: {0}")]
    Publish(#[from] PublishError),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Outcome of a failed publish or dead-letter send
///
/// The pipeline treats every variant except [`PublishError::CircuitOpen`]
/// the same way: as a failed attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Publisher could not be initialized
    #[error("initialization failed: {0}")]
    Init(String),

    /// Connection to the bus failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Bus answered with a negative acknowledgement
    #[error("rejected by bus: {0}")]
    Rejected(String),

    /// Attempt did not complete within the publish timeout
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// Event could not be serialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Circuit breaker is open, no attempt was made
    #[error("circuit breaker is open")]
    CircuitOpen,
}
