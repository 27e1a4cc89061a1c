//! Error types for the wallet ledger

use protocol::{AccountId, Currency};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (backend unavailable, write rejected)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account already opened
    #[error("Account already exists: {0}")]
    AccountExists(AccountId),

    /// Amount rejected (zero, negative)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Sender and receiver hold different currencies
    #[error("Currency mismatch: sender {sender}, receiver {receiver}")]
    CurrencyMismatch {
        /// Sender account currency
        sender: Currency,
        /// Receiver account currency
        receiver: Currency,
    },

    /// Settlement event that can never apply
    #[error("Invalid settlement: {0}")]
    InvalidSettlement(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

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

impl Error {
    /// True when retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Concurrency(_) | Error::Io(_)
        )
    }
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
