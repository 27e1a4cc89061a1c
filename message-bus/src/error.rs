//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// JetStream error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Operation timed out
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Handler rejected a message; it will be redelivered
    #[error("Handler error: {0}")]
    Handler(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// DLQ entry cannot be replayed
    #[error("Not reprocessable: {0}")]
    NotReprocessable(String),

    /// Transport shut down
    #[error("Transport closed")]
    Closed,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Handler(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Handler(s.to_string())
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
