//! Error types for the transaction service
//!
//! [`Error`] is the crate-internal failure type (storage, config, bus).
//! [`TransferError`] is what callers of the orchestrator see; every variant
//! maps to a stable code and an HTTP status.

use protocol::TransferId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for internal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Internal errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Record already exists
    #[error("Duplicate transfer record: {0}")]
    DuplicateRecord(TransferId),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Outcome of a rejected transfer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    /// Request failed validation; nothing was written
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Sender cannot cover the amount; a FAILED record was written
    #[error("Insufficient balance for transfer {transfer_id}: available {available}")]
    InsufficientBalance {
        /// Id of the FAILED record
        transfer_id: TransferId,
        /// Spendable balance reported by the oracle
        available: Decimal,
    },

    /// Oracle did not answer in time or at all; nothing was committed
    #[error("Balance check unavailable: {0}")]
    BalanceCheckUnavailable(String),

    /// Local write failed; nothing was committed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TransferError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TransferError::BalanceCheckUnavailable(_) => "BALANCE_CHECK_UNAVAILABLE",
            TransferError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP status an outer layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::InvalidRequest(_) => 400,
            TransferError::InsufficientBalance { .. } => 422,
            TransferError::BalanceCheckUnavailable(_) => 503,
            TransferError::Storage(_) => 500,
        }
    }

    /// Whether the caller may resubmit the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::BalanceCheckUnavailable(_) | TransferError::Storage(_)
        )
    }
}

impl From<Error> for TransferError {
    fn from(err: Error) -> Self {
        TransferError::Storage(err.to_string())
    }
}
