//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the wallet ledger.
//!
//! # Metrics
//!
//! - `wallet_settlements_applied_total` - Settlements committed
//! - `wallet_settlements_duplicate_total` - Replays skipped by dedup
//! - `wallet_overdrafts_total` - Settlements that left the sender negative
//! - `wallet_reservations_total{outcome}` - Reserve calls by outcome
//! - `wallet_holds_expired_total` - Holds released by the sweeper
//! - `wallet_apply_duration_seconds` - Histogram of settlement commit latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Settlements committed
    pub settlements_applied: IntCounter,

    /// Replays skipped
    pub settlements_duplicate: IntCounter,

    /// Settlements that overdrew the sender
    pub overdrafts: IntCounter,

    /// Reserve calls by outcome
    pub reservations: IntCounterVec,

    /// Holds released by expiry
    pub holds_expired: IntCounter,

    /// Apply duration histogram
    pub apply_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let settlements_applied = IntCounter::new(
            "wallet_settlements_applied_total",
            "Settlements committed to the ledger",
        )?;
        registry.register(Box::new(settlements_applied.clone()))?;

        let settlements_duplicate = IntCounter::new(
            "wallet_settlements_duplicate_total",
            "Settlement replays skipped by dedup",
        )?;
        registry.register(Box::new(settlements_duplicate.clone()))?;

        let overdrafts = IntCounter::new(
            "wallet_overdrafts_total",
            "Settlements that left the sender below zero",
        )?;
        registry.register(Box::new(overdrafts.clone()))?;

        let reservations = IntCounterVec::new(
            Opts::new("wallet_reservations_total", "Reserve calls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(reservations.clone()))?;

        let holds_expired = IntCounter::new(
            "wallet_holds_expired_total",
            "Holds released after their time-to-live",
        )?;
        registry.register(Box::new(holds_expired.clone()))?;

        let apply_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wallet_apply_duration_seconds",
                "Histogram of settlement commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250]),
        )?;
        registry.register(Box::new(apply_duration.clone()))?;

        Ok(Self {
            settlements_applied,
            settlements_duplicate,
            overdrafts,
            reservations,
            holds_expired,
            apply_duration,
            registry,
        })
    }

    /// Record a committed settlement
    pub fn record_applied(&self, overdraft: bool, duration_seconds: f64) {
        self.settlements_applied.inc();
        if overdraft {
            self.overdrafts.inc();
        }
        self.apply_duration.observe(duration_seconds);
    }

    /// Record a skipped replay
    pub fn record_duplicate(&self) {
        self.settlements_duplicate.inc();
    }

    /// Record a reserve outcome
    pub fn record_reservation(&self, outcome: &str) {
        self.reservations.with_label_values(&[outcome]).inc();
    }

    /// Record expired holds
    pub fn record_holds_expired(&self, count: usize) {
        self.holds_expired.inc_by(count as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
