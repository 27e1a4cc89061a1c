//! Ledger reconciliation
//!
//! The consumer debits unconditionally, so a balance can go negative when a
//! transfer was admitted without a hold. The scan surfaces that, together
//! with holds that exceed their balance and holds nobody cleaned up.

use crate::Result;
use chrono::Utc;
use protocol::AccountId;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use wallet_ledger::{Hold, Ledger};

/// Account with a negative balance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overdraft {
    /// Account
    pub account_id: AccountId,
    /// Balance below zero
    pub balance: Decimal,
}

/// Account whose open holds exceed its balance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverHeld {
    /// Account
    pub account_id: AccountId,
    /// Balance
    pub balance: Decimal,
    /// Sum of open holds
    pub held: Decimal,
}

/// Result of one scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// Accounts scanned
    pub total_accounts: usize,
    /// Sum of all balances
    pub total_balance: Decimal,
    /// Accounts below zero
    pub overdrawn: Vec<Overdraft>,
    /// Accounts with holds above balance
    pub over_held: Vec<OverHeld>,
    /// Holds older than the TTL
    pub stale_holds: Vec<Hold>,
}

impl ReconciliationReport {
    /// Nothing to look at
    pub fn is_clean(&self) -> bool {
        self.overdrawn.is_empty() && self.over_held.is_empty() && self.stale_holds.is_empty()
    }
}

/// Scans the wallet ledger for discrepancies
#[derive(Debug)]
pub struct Reconciler {
    ledger: Arc<Ledger>,
    hold_ttl: Duration,
}

impl Reconciler {
    /// Create reconciler; holds older than `hold_ttl` are reported as stale
    pub fn new(ledger: Arc<Ledger>, hold_ttl: Duration) -> Self {
        Self { ledger, hold_ttl }
    }

    /// Scan every account and hold once
    pub fn scan(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();

        for account in self.ledger.accounts()? {
            report.total_accounts += 1;
            report.total_balance += account.balance;

            if account.balance < Decimal::ZERO {
                report.overdrawn.push(Overdraft {
                    account_id: account.account_id,
                    balance: account.balance,
                });
            }
            if account.held > account.balance.max(Decimal::ZERO) {
                report.over_held.push(OverHeld {
                    account_id: account.account_id,
                    balance: account.balance,
                    held: account.held,
                });
            }
        }

        let ttl = chrono::Duration::from_std(self.hold_ttl)
            .map_err(|e| crate::Error::Config(format!("hold ttl: {}", e)))?;
        let cutoff = Utc::now() - ttl;
        report.stale_holds = self
            .ledger
            .holds()?
            .into_iter()
            .filter(|hold| hold.placed_at < cutoff)
            .collect();

        if report.is_clean() {
            info!(
                accounts = report.total_accounts,
                total_balance = %report.total_balance,
                "Reconciliation clean"
            );
        } else {
            for overdraft in &report.overdrawn {
                warn!(
                    account_id = %overdraft.account_id,
                    balance = %overdraft.balance,
                    "Overdrawn account"
                );
            }
            warn!(
                accounts = report.total_accounts,
                overdrawn = report.overdrawn.len(),
                over_held = report.over_held.len(),
                stale_holds = report.stale_holds.len(),
                "Reconciliation found discrepancies"
            );
        }

        Ok(report)
    }

    /// Scan every `interval` until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.scan() {
                warn!(error = %e, "Reconciliation scan failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
