//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `transfers_total{status}` - Transfer outcomes (completed, failed, rejected, unavailable)
//! - `transfer_oracle_duration_seconds` - Oracle round-trip latency
//! - `transfer_oracle_failures_total{reason}` - Oracle calls without an answer
//! - `outbox_published_total` - Settlement events handed to the channel
//! - `outbox_publish_failures_total` - Failed relay publishes

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Transfers by outcome
    pub transfers: IntCounterVec,

    /// Oracle latency histogram
    pub oracle_duration: Histogram,

    /// Oracle failures by reason
    pub oracle_failures: IntCounterVec,

    /// Outbox entries published
    pub outbox_published: IntCounter,

    /// Outbox publish failures
    pub outbox_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers = IntCounterVec::new(
            Opts::new("transfers_total", "Transfer outcomes"),
            &["status"],
        )?;
        registry.register(Box::new(transfers.clone()))?;

        let oracle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "transfer_oracle_duration_seconds",
                "Balance oracle round-trip latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 3.0]),
        )?;
        registry.register(Box::new(oracle_duration.clone()))?;

        let oracle_failures = IntCounterVec::new(
            Opts::new(
                "transfer_oracle_failures_total",
                "Balance oracle calls that produced no answer",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(oracle_failures.clone()))?;

        let outbox_published = IntCounter::new(
            "outbox_published_total",
            "Settlement events handed to the channel",
        )?;
        registry.register(Box::new(outbox_published.clone()))?;

        let outbox_failures = IntCounter::new(
            "outbox_publish_failures_total",
            "Failed settlement event publishes",
        )?;
        registry.register(Box::new(outbox_failures.clone()))?;

        Ok(Self {
            transfers,
            oracle_duration,
            oracle_failures,
            outbox_published,
            outbox_failures,
            registry,
        })
    }

    /// Record a transfer outcome
    pub fn record_transfer(&self, status: &str) {
        self.transfers.with_label_values(&[status]).inc();
    }

    /// Count of transfers with `status`
    pub fn transfers_with(&self, status: &str) -> u64 {
        self.transfers.with_label_values(&[status]).get()
    }

    /// Record an oracle failure
    pub fn record_oracle_failure(&self, reason: &str) {
        self.oracle_failures.with_label_values(&[reason]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
