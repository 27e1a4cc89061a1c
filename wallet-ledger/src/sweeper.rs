//! Hold sweeper
//!
//! Background task releasing holds nobody settled or released, e.g. when the
//! orchestrator crashed between reserving and writing its record.
//!
//! Age alone does not make a hold an orphan: a committed transfer keeps its
//! hold until the settlement event is applied, however long the channel takes.
//! With a [`HoldAuthority`] the sweeper asks the transaction side before
//! expiring and keeps every hold whose transfer awaits settlement. Without one
//! it expires by age only, so a settlement delayed past `hold_ttl` can overdraw
//! the sender; the reconciler reports that case.

use crate::{Ledger, Result};
use async_trait::async_trait;
use chrono::Utc;
use protocol::TransferId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Knows which held transfers were committed upstream
#[async_trait]
pub trait HoldAuthority: Send + Sync {
    /// Whether `transfer_id` was committed and its settlement is still due
    async fn awaits_settlement(&self, transfer_id: &TransferId) -> Result<bool>;
}

/// Configuration for the sweeper
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// Holds older than this are candidates for release
    pub hold_ttl: Duration,
    /// Release markers older than this are forgotten
    pub release_ttl: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            hold_ttl: Duration::from_secs(600),
            release_ttl: Duration::from_secs(86_400),
        }
    }
}

impl SweeperConfig {
    /// Take interval and ttls from the ledger configuration
    pub fn from_ledger_config(config: &crate::Config) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            hold_ttl: config.hold_ttl(),
            release_ttl: config.release_ttl(),
        }
    }
}

/// Periodically releases expired holds
pub struct HoldSweeper {
    ledger: Arc<Ledger>,
    config: SweeperConfig,
    authority: Option<Arc<dyn HoldAuthority>>,
}

impl std::fmt::Debug for HoldSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldSweeper")
            .field("config", &self.config)
            .field("authority", &self.authority.is_some())
            .finish()
    }
}

impl HoldSweeper {
    /// Create a new sweeper expiring by age only
    pub fn new(ledger: Arc<Ledger>, config: SweeperConfig) -> Self {
        Self {
            ledger,
            config,
            authority: None,
        }
    }

    /// Consult `authority` before expiring a hold
    pub fn with_authority(mut self, authority: Arc<dyn HoldAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Run until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            hold_ttl_secs = self.config.hold_ttl.as_secs(),
            consults_authority = self.authority.is_some(),
            "Starting hold sweeper"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Hold sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Hold sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Release expired holds once; returns how many were released
    pub async fn sweep_once(&self) -> Result<usize> {
        let hold_ttl = chrono::Duration::from_std(self.config.hold_ttl)
            .map_err(|e| crate::Error::Config(format!("hold ttl: {}", e)))?;
        let cutoff = Utc::now() - hold_ttl;
        let keep = self.pending_settlements(cutoff).await?;

        let expired = self.ledger.expire_holds_before(cutoff, keep).await?;

        let pruned = self.ledger.prune_releases(self.config.release_ttl).await?;
        if pruned > 0 {
            debug!(pruned, "Pruned release markers");
        }

        if expired.is_empty() {
            debug!("No expired holds");
            return Ok(0);
        }

        for hold in &expired {
            warn!(
                transfer_id = %hold.transfer_id,
                account_id = %hold.account_id,
                amount = %hold.amount,
                placed_at = %hold.placed_at,
                "Released expired hold"
            );
        }

        Ok(expired.len())
    }

    /// Stale holds the authority says are still owed a settlement
    async fn pending_settlements(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<HashSet<TransferId>> {
        let mut keep = HashSet::new();
        let authority = match &self.authority {
            Some(authority) => authority,
            None => return Ok(keep),
        };

        for hold in self.ledger.holds()? {
            if hold.placed_at >= cutoff {
                continue;
            }
            match authority.awaits_settlement(&hold.transfer_id).await {
                Ok(true) => {
                    warn!(
                        transfer_id = %hold.transfer_id,
                        account_id = %hold.account_id,
                        placed_at = %hold.placed_at,
                        "Hold outlived ttl, settlement still due"
                    );
                    keep.insert(hold.transfer_id);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        transfer_id = %hold.transfer_id,
                        error = %e,
                        "Could not resolve hold, keeping it"
                    );
                    keep.insert(hold.transfer_id);
                }
            }
        }

        Ok(keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use protocol::{AccountId, Currency};
    use rust_decimal_macros::dec;

    fn eager() -> SweeperConfig {
        SweeperConfig {
            scan_interval: Duration::from_millis(10),
            hold_ttl: Duration::ZERO,
            release_ttl: Duration::from_secs(3600),
        }
    }

    struct Committed(HashSet<TransferId>);

    #[async_trait]
    impl HoldAuthority for Committed {
        async fn awaits_settlement(&self, transfer_id: &TransferId) -> Result<bool> {
            Ok(self.0.contains(transfer_id))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl HoldAuthority for Unreachable {
        async fn awaits_settlement(&self, _transfer_id: &TransferId) -> Result<bool> {
            Err(crate::Error::Storage("transaction store offline".into()))
        }
    }

    async fn ledger_with_account() -> (Arc<Ledger>, AccountId) {
        let ledger = Arc::new(Ledger::open(Config::default()).await.unwrap());
        let account = ledger
            .open_account(AccountId::random(), dec!(100), Currency::USD)
            .await
            .unwrap();
        (ledger, account.account_id)
    }

    #[tokio::test]
    async fn test_sweep_once_releases_only_expired() {
        let (ledger, account_id) = ledger_with_account().await;
        ledger
            .reserve(TransferId::generate(), account_id, dec!(10))
            .await
            .unwrap();

        let patient = HoldSweeper::new(ledger.clone(), SweeperConfig::default());
        assert_eq!(patient.sweep_once().await.unwrap(), 0);

        let eager = HoldSweeper::new(ledger.clone(), eager());
        assert_eq!(eager.sweep_once().await.unwrap(), 1);
        assert_eq!(ledger.metrics().holds_expired.get(), 1);
    }

    #[tokio::test]
    async fn test_committed_transfer_keeps_its_hold() {
        let (ledger, account_id) = ledger_with_account().await;
        let committed = TransferId::generate();
        let orphan = TransferId::generate();
        ledger.reserve(committed, account_id, dec!(60)).await.unwrap();
        ledger.reserve(orphan, account_id, dec!(30)).await.unwrap();

        let sweeper = HoldSweeper::new(ledger.clone(), eager())
            .with_authority(Arc::new(Committed(HashSet::from([committed]))));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let holds = ledger.holds().unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].transfer_id, committed);

        // the kept hold still blocks a competing reserve
        let competing = ledger
            .reserve(TransferId::generate(), account_id, dec!(60))
            .await
            .unwrap();
        assert!(!competing.is_reserved());
    }

    #[tokio::test]
    async fn test_unresolved_hold_is_kept() {
        let (ledger, account_id) = ledger_with_account().await;
        ledger
            .reserve(TransferId::generate(), account_id, dec!(10))
            .await
            .unwrap();

        let sweeper = HoldSweeper::new(ledger.clone(), eager()).with_authority(Arc::new(Unreachable));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(ledger.holds().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_prunes_old_release_markers() {
        let (ledger, _) = ledger_with_account().await;
        ledger.release(TransferId::generate()).await.unwrap();

        let keep_markers = HoldSweeper::new(ledger.clone(), eager());
        keep_markers.sweep_once().await.unwrap();
        assert_eq!(ledger.releases().unwrap().len(), 1);

        let forget_markers = HoldSweeper::new(
            ledger.clone(),
            SweeperConfig {
                release_ttl: Duration::ZERO,
                ..eager()
            },
        );
        forget_markers.sweep_once().await.unwrap();
        assert!(ledger.releases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let ledger = Arc::new(Ledger::open(Config::default()).await.unwrap());
        let sweeper = HoldSweeper::new(
            ledger,
            SweeperConfig {
                scan_interval: Duration::from_millis(5),
                hold_ttl: Duration::from_secs(1),
                release_ttl: Duration::from_secs(1),
            },
        );
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(async move { sweeper.run(rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
