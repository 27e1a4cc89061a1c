//! Error types for the settlement consumer

use protocol::TransferId;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Applying a settlement to the ledger failed
    #[error("Settlement apply failure for {transfer_id}: {reason}")]
    ApplyFailure {
        /// Transfer being settled
        transfer_id: TransferId,
        /// Underlying cause
        reason: String,
        /// Whether retrying may succeed
        retryable: bool,
        /// Whether an operator replay may succeed once the cause is fixed
        reprocessable: bool,
    },

    /// Payload is not a settlement event
    #[error("Decode error: {0}")]
    Decode(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] wallet_ledger::Error),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Determine if an error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ApplyFailure { retryable, .. } => *retryable,
            Error::Ledger(e) => e.is_transient(),
            Error::Bus(_) => true,
            Error::Io(_) => true,
            Error::Decode(_) | Error::Config(_) | Error::Other(_) => false,
        }
    }

    /// Whether a dead-lettered event may be replayed.
    ///
    /// Missing accounts and currency mismatches are fixed on the ledger, after
    /// which the replay applies. Malformed events never will.
    pub fn is_reprocessable(&self) -> bool {
        match self {
            Error::ApplyFailure { reprocessable, .. } => *reprocessable,
            Error::Ledger(e) => ledger_reprocessable(e),
            Error::Bus(_) | Error::Io(_) => true,
            Error::Decode(_) | Error::Config(_) | Error::Other(_) => false,
        }
    }

    /// Wrap a ledger error raised while applying `transfer_id`
    pub fn apply_failure(transfer_id: TransferId, err: wallet_ledger::Error) -> Self {
        Error::ApplyFailure {
            transfer_id,
            retryable: err.is_transient(),
            reprocessable: ledger_reprocessable(&err),
            reason: err.to_string(),
        }
    }
}

fn ledger_reprocessable(err: &wallet_ledger::Error) -> bool {
    err.is_transient()
        || matches!(
            err,
            wallet_ledger::Error::AccountNotFound(_) | wallet_ledger::Error::CurrencyMismatch { .. }
        )
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
