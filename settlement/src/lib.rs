//! Settlement consumer
//!
//! Applies settlement events published by the transaction side to the
//! wallet ledger.
//!
//! # Delivery contract
//!
//! The channel delivers at least once. The consumer:
//!
//! 1. **Decodes** the event; malformed payloads go to the dead-letter queue
//! 2. **Applies** it through the ledger's single writer, which debits the
//!    sender, credits the receiver and records the transfer id atomically
//! 3. **Deduplicates** replays: a transfer id already recorded is a no-op
//! 4. **Retries** transient failures with exponential backoff and jitter
//! 5. **Escalates** to the dead-letter queue when retries are exhausted or
//!    the failure is permanent, and only then acknowledges
//!
//! # Example
//!
//! ```no_run
//! use message_bus::{DlqRouter, InMemoryTransport, Publisher, PublisherConfig};
//! use settlement::{ConsumerConfig, SettlementConsumer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let ledger = Arc::new(wallet_ledger::Ledger::open(Default::default()).await?);
//!     let transport = Arc::new(InMemoryTransport::default());
//!     let dlq = Arc::new(DlqRouter::new(Publisher::new(
//!         transport.clone(),
//!         PublisherConfig::default(),
//!     )));
//!
//!     let consumer = Arc::new(SettlementConsumer::new(ledger, dlq, ConsumerConfig::default()));
//!     let _subscription = consumer.subscribe(transport).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod consumer;
pub mod error;
pub mod reconciliation;
pub mod retry;
pub mod state;

// Re-exports
pub use config::ConsumerConfig;
pub use consumer::SettlementConsumer;
pub use error::{Error, Result};
pub use reconciliation::{OverHeld, Overdraft, ReconciliationReport, Reconciler};
pub use retry::{Attempted, RetryConfig, RetryStrategy};
pub use state::{SettlementState, StateTracker};
