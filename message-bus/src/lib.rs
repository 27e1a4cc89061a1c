//! Message Bus with NATS support
//!
//! Provides the settlement event channel:
//! - Partitioning by account id (per-account ordering)
//! - At-least-once delivery to consumer groups
//! - In-memory transport for single-process deployments and tests
//! - JetStream transport for persistence and broker-side deduplication
//! - Retry logic with exponential backoff
//! - Dead-letter routing with replay
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod dlq_router;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod partitioning;
pub mod publisher;
pub mod subscriber;
pub mod transport;
pub mod types;

pub use dlq_router::{DlqEntry, DlqRouter, DlqStats};
pub use error::{Error, Result};
pub use jetstream::{JetStreamTransport, NatsConfig};
pub use memory::{InMemoryConfig, InMemoryTransport};
pub use message::Message;
pub use publisher::{Publisher, PublisherConfig};
pub use subscriber::{MessageHandler, Subscriber, SubscriberConfig};
pub use transport::{Subscription, Transport};
pub use types::{MessageType, PartitionKey};
