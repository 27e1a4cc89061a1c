//! Transaction service
//!
//! The transaction side of the transfer rail: accepts transfer requests,
//! asks the wallet side's balance oracle, keeps the transfer records and
//! publishes one settlement event per completed transfer.
//!
//! # Architecture
//!
//! - **Fail Closed**: the oracle call runs under a deadline; no answer means
//!   no record and no event
//! - **Transactional Outbox**: a COMPLETED record and its pending event are one
//!   atomic write; [`OutboxRelay`] publishes afterwards and retries until the
//!   channel accepts
//! - **Reserve Policy**: by default admission is a check-and-hold on the
//!   ledger, so concurrent transfers cannot both spend the same funds
//!
//! # Example
//!
//! ```no_run
//! use protocol::{AccountId, TransferRequest};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use transaction_service::{open_store, Config, Metrics, TransferOrchestrator};
//!
//! # async fn run(oracle: Arc<dyn protocol::BalanceOracle>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let orchestrator =
//!     TransferOrchestrator::new(open_store(&config)?, oracle, &config, Metrics::new()?);
//!
//! let record = orchestrator
//!     .transfer(TransferRequest::new(
//!         AccountId::random(),
//!         AccountId::random(),
//!         Decimal::new(5000, 2),
//!     ))
//!     .await?;
//! println!("{} {}", record.id, record.status);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod oracle_client;
pub mod orchestrator;
pub mod outbox;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod store;

// Re-exports
pub use config::{BalancePolicy, Config, OutboxConfig, StorageBackend};
pub use error::{Error, Result, TransferError};
pub use metrics::Metrics;
pub use oracle_client::OracleClient;
pub use orchestrator::{TransferOrchestrator, TransferResult};
pub use outbox::OutboxRelay;
pub use store::{open_store, MemoryStore, OutboxEntry, TransactionStore};
