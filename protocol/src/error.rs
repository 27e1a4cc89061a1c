//! RPC error type

use thiserror::Error;

/// Result type for oracle RPC calls
pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Failure talking to the balance oracle.
///
/// Every variant means "the answer is unknown"; callers must not read any of
/// them as a balance verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Call did not complete within the client deadline
    #[error("RPC timed out after {0} ms")]
    Timeout(u64),

    /// Request or reply could not be delivered
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server accepted the call but failed to answer it
    #[error("Server error: {0}")]
    Server(String),
}

impl From<String> for RpcError {
    fn from(msg: String) -> Self {
        RpcError::Server(msg)
    }
}

impl From<&str> for RpcError {
    fn from(msg: &str) -> Self {
        RpcError::Server(msg.to_string())
    }
}
