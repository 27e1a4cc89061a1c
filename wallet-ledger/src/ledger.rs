//! Main ledger orchestration layer
//!
//! Ties storage, the writer actor and metrics into the API used by the
//! balance oracle, the settlement consumer and the hold sweeper.
//!
//! # Example
//!
//! ```no_run
//! use wallet_ledger::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     let account = ledger.ensure_account(protocol::AccountId::random()).await?;
//!     println!("{} {}", account.balance, account.currency);
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    config::SeedAccount,
    metrics::Metrics,
    storage::{open_storage, LedgerStorage},
    types::{AccountBalance, ApplyOutcome, Hold, ReleaseMarker, ReserveOutcome},
    Config, Error, Result,
};
use chrono::Utc;
use protocol::{AccountId, Currency, SettlementEvent, TransferId};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<dyn LedgerStorage>,

    /// Metrics
    metrics: Arc<Metrics>,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("service_name", &self.config.service_name)
            .field("storage", &self.config.storage)
            .finish()
    }
}

impl Ledger {
    /// Open ledger with the storage backend named in `config`
    pub async fn open(config: Config) -> Result<Self> {
        let storage = open_storage(&config)?;
        Self::with_storage(storage, config).await
    }

    /// Open ledger over an existing storage backend
    pub async fn with_storage(storage: Arc<dyn LedgerStorage>, config: Config) -> Result<Self> {
        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Other(format!("metrics registration: {}", e)))?,
        );
        let handle = spawn_ledger_actor(
            storage.clone(),
            metrics.clone(),
            config.actor.mailbox_capacity,
        );

        let ledger = Self {
            handle,
            storage,
            metrics,
            config,
        };

        let seeds = ledger.config.seed_accounts.clone();
        for seed in &seeds {
            ledger.seed(seed).await?;
        }

        tracing::info!(
            service = %ledger.config.service_name,
            seeded = seeds.len(),
            "Wallet ledger ready"
        );

        Ok(ledger)
    }

    async fn seed(&self, seed: &SeedAccount) -> Result<AccountBalance> {
        let currency = seed.currency.unwrap_or(self.config.default_currency);
        let account = self
            .handle
            .open_account(
                AccountBalance::new(seed.account_id, seed.balance, currency),
                true,
            )
            .await?;

        tracing::info!(
            account_id = %account.account_id,
            label = seed.label.as_deref().unwrap_or("-"),
            balance = %account.balance,
            "Seed account ensured"
        );
        Ok(account)
    }

    /// Open a new account; fails if it already exists
    pub async fn open_account(
        &self,
        account_id: AccountId,
        initial_balance: Decimal,
        currency: Currency,
    ) -> Result<AccountBalance> {
        self.handle
            .open_account(AccountBalance::new(account_id, initial_balance, currency), false)
            .await
    }

    /// Return the account, provisioning it with the default opening balance if missing
    pub async fn ensure_account(&self, account_id: AccountId) -> Result<AccountBalance> {
        if let Some(account) = self.storage.get_account(&account_id)? {
            return Ok(account);
        }
        self.handle
            .open_account(
                AccountBalance::new(
                    account_id,
                    self.config.default_opening_balance,
                    self.config.default_currency,
                ),
                true,
            )
            .await
    }

    /// Account by id (direct read)
    pub fn account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        self.storage.get_account(account_id)
    }

    /// Every account (direct read)
    pub fn accounts(&self) -> Result<Vec<AccountBalance>> {
        self.storage.list_accounts()
    }

    /// Every open hold (direct read)
    pub fn holds(&self) -> Result<Vec<Hold>> {
        self.storage.list_holds()
    }

    /// Release markers not yet pruned
    pub fn releases(&self) -> Result<Vec<ReleaseMarker>> {
        self.storage.list_releases()
    }

    /// Whether the transfer id has been settled
    pub fn is_settled(&self, transfer_id: &TransferId) -> Result<bool> {
        Ok(self.storage.get_marker(transfer_id)?.is_some())
    }

    /// Atomic check-and-hold for one transfer
    pub async fn reserve(
        &self,
        transfer_id: TransferId,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<ReserveOutcome> {
        self.handle.reserve(transfer_id, account_id, amount).await
    }

    /// Drop the hold of a transfer; false if none existed.
    ///
    /// The release is remembered, so a reserve for the same transfer that
    /// arrives afterwards is refused instead of placing a hold.
    pub async fn release(&self, transfer_id: TransferId) -> Result<bool> {
        self.handle.release(transfer_id).await
    }

    /// Debit sender and credit receiver once per transfer id.
    ///
    /// The debit does not look at what the oracle answered earlier; it reads
    /// the balance inside the writer and applies unconditionally.
    pub async fn apply_settlement(&self, event: SettlementEvent) -> Result<ApplyOutcome> {
        let transfer_id = event.transfer_id;
        let sender_id = event.sender_id;
        let outcome = self.handle.apply_settlement(event).await?;

        match &outcome {
            ApplyOutcome::Applied {
                sender_balance,
                overdraft: true,
                ..
            } => {
                tracing::warn!(
                    transfer_id = %transfer_id,
                    account_id = %sender_id,
                    balance = %sender_balance,
                    "Settlement overdrew sender"
                );
            }
            ApplyOutcome::Applied { .. } => {
                tracing::debug!(transfer_id = %transfer_id, "Settlement applied");
            }
            ApplyOutcome::Duplicate => {
                tracing::debug!(transfer_id = %transfer_id, "Settlement already applied");
            }
        }

        Ok(outcome)
    }

    /// Release holds older than `max_age`, except the transfers in `keep`
    pub async fn expire_holds(
        &self,
        max_age: Duration,
        keep: HashSet<TransferId>,
    ) -> Result<Vec<Hold>> {
        self.handle.expire_holds(cutoff(max_age)?, keep).await
    }

    /// Release holds placed before `cutoff`, except the transfers in `keep`
    pub async fn expire_holds_before(
        &self,
        cutoff: chrono::DateTime<Utc>,
        keep: HashSet<TransferId>,
    ) -> Result<Vec<Hold>> {
        self.handle.expire_holds(cutoff, keep).await
    }

    /// Forget release markers older than `max_age`
    pub async fn prune_releases(&self, max_age: Duration) -> Result<usize> {
        self.handle.prune_releases(cutoff(max_age)?).await
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

fn cutoff(max_age: Duration) -> Result<chrono::DateTime<Utc>> {
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| Error::Config(format!("max age: {}", e)))?;
    Ok(Utc::now() - max_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn ledger() -> Ledger {
        Ledger::open(Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_seed_accounts_on_open() {
        let alice = AccountId::random();
        let config = Config {
            seed_accounts: vec![SeedAccount {
                account_id: alice,
                label: Some("alice".to_string()),
                balance: dec!(1000.00),
                currency: None,
            }],
            ..Config::default()
        };

        let ledger = Ledger::open(config).await.unwrap();
        let account = ledger.account(&alice).unwrap().unwrap();
        assert_eq!(account.balance, dec!(1000.00));
        assert_eq!(account.currency, Currency::USD);
    }

    #[tokio::test]
    async fn test_ensure_account_uses_default_opening_balance() {
        let ledger = ledger().await;
        let id = AccountId::random();

        let created = ledger.ensure_account(id).await.unwrap();
        assert_eq!(created.balance, dec!(1000.00));

        // existing account is returned untouched
        let again = ledger.ensure_account(id).await.unwrap();
        assert_eq!(again, created);
    }

    #[tokio::test]
    async fn test_apply_settlement_and_is_settled() {
        let ledger = ledger().await;
        let sender = ledger
            .open_account(AccountId::random(), dec!(100.00), Currency::USD)
            .await
            .unwrap();
        let receiver = ledger
            .open_account(AccountId::random(), dec!(5.00), Currency::USD)
            .await
            .unwrap();

        let event = SettlementEvent::new(
            TransferId::generate(),
            sender.account_id,
            receiver.account_id,
            dec!(50.00),
            Utc::now(),
        );
        assert!(!ledger.is_settled(&event.transfer_id).unwrap());

        ledger.apply_settlement(event.clone()).await.unwrap();
        assert!(ledger.is_settled(&event.transfer_id).unwrap());
        assert_eq!(
            ledger.account(&receiver.account_id).unwrap().unwrap().balance,
            dec!(55.00)
        );
        assert_eq!(ledger.metrics().settlements_applied.get(), 1);
    }

    #[tokio::test]
    async fn test_expire_holds_by_age() {
        let ledger = ledger().await;
        let account = ledger
            .open_account(AccountId::random(), dec!(10), Currency::USD)
            .await
            .unwrap();
        ledger
            .reserve(TransferId::generate(), account.account_id, dec!(4))
            .await
            .unwrap();

        assert!(ledger
            .expire_holds(Duration::from_secs(3600), HashSet::new())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            ledger
                .expire_holds(Duration::ZERO, HashSet::new())
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(ledger.holds().unwrap().is_empty());
    }
}
