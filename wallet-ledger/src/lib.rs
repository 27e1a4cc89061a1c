//! Wallet ledger
//!
//! Durable per-account balances and the balance oracle answering from them.
//!
//! # Architecture
//!
//! - **Single Writer**: every mutation goes through one actor task, so a
//!   debit is a read-modify-write nobody can interleave with
//! - **Atomic Commits**: balances, holds and processed-settlement markers of one
//!   operation land in a single storage batch
//! - **Direct Reads**: the oracle reads storage without touching the actor
//!
//! # Invariants
//!
//! - Money conservation: a settlement moves `amount` from sender to receiver, nothing else
//! - At-most-once apply: a transfer id is settled once, replays are no-ops
//! - Holds never change `balance`, only what is spendable

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod oracle;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod storage;
pub mod sweeper;
pub mod types;

// Re-exports
pub use config::{Config, SeedAccount, StorageBackend};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use oracle::LedgerOracle;
pub use storage::{LedgerBatch, LedgerStorage, MemoryStorage};
pub use sweeper::{HoldAuthority, HoldSweeper, SweeperConfig};
pub use types::{
    AccountBalance, ApplyOutcome, Hold, ReleaseMarker, ReserveOutcome, SettlementMarker,
};
