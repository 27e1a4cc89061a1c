//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task eliminates lost updates
//! - Every operation is read, compute, then one atomic storage commit
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │   Settlement consumer        Balance oracle (reserve) │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   read accounts/holds/markers → compute → commit      │
//! │                       │                               │
//! │                       ▼                               │
//! │           LedgerStorage::commit(batch)                │
//! │                 (all or nothing)                      │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::metrics::Metrics;
use crate::storage::{LedgerBatch, LedgerStorage};
use crate::types::{
    AccountBalance, ApplyOutcome, Hold, ReleaseMarker, ReserveOutcome, SettlementMarker,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use protocol::{AccountId, SettlementEvent, TransferId};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Open an account
    OpenAccount {
        account: AccountBalance,
        /// Return the existing record instead of failing
        if_missing: bool,
        response: oneshot::Sender<Result<AccountBalance>>,
    },

    /// Atomic check-and-hold
    Reserve {
        transfer_id: TransferId,
        account_id: AccountId,
        amount: Decimal,
        response: oneshot::Sender<Result<ReserveOutcome>>,
    },

    /// Drop a hold and remember the release
    Release {
        transfer_id: TransferId,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Apply a settlement event
    ApplySettlement {
        event: SettlementEvent,
        response: oneshot::Sender<Result<ApplyOutcome>>,
    },

    /// Release holds placed before the cutoff, except those in `keep`
    ExpireHolds {
        cutoff: DateTime<Utc>,
        keep: HashSet<TransferId>,
        response: oneshot::Sender<Result<Vec<Hold>>>,
    },

    /// Forget release markers written before the cutoff
    PruneReleases {
        cutoff: DateTime<Utc>,
        response: oneshot::Sender<Result<usize>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<dyn LedgerStorage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Metrics
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor").finish_non_exhaustive()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<dyn LedgerStorage>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => {
                    tracing::info!("Ledger actor shutting down");
                    break;
                }
                msg => self.handle_message(msg),
            }
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::OpenAccount {
                account,
                if_missing,
                response,
            } => {
                let _ = response.send(self.open_account(account, if_missing));
            }

            LedgerMessage::Reserve {
                transfer_id,
                account_id,
                amount,
                response,
            } => {
                let _ = response.send(self.reserve(transfer_id, account_id, amount));
            }

            LedgerMessage::Release {
                transfer_id,
                response,
            } => {
                let _ = response.send(self.release(transfer_id));
            }

            LedgerMessage::ApplySettlement { event, response } => {
                let result = self.apply_settlement(&event);
                if let Err(e) = &result {
                    tracing::error!(
                        transfer_id = %event.transfer_id,
                        error = %e,
                        "Settlement apply failed"
                    );
                }
                let _ = response.send(result);
            }

            LedgerMessage::ExpireHolds {
                cutoff,
                keep,
                response,
            } => {
                let _ = response.send(self.expire_holds(cutoff, &keep));
            }

            LedgerMessage::PruneReleases { cutoff, response } => {
                let _ = response.send(self.prune_releases(cutoff));
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn open_account(&self, account: AccountBalance, if_missing: bool) -> Result<AccountBalance> {
        if account.balance < Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "opening balance {} is negative",
                account.balance
            )));
        }

        if let Some(existing) = self.storage.get_account(&account.account_id)? {
            if if_missing {
                return Ok(existing);
            }
            return Err(Error::AccountExists(account.account_id));
        }

        self.storage.commit(LedgerBatch {
            accounts: vec![account.clone()],
            ..Default::default()
        })?;

        tracing::info!(
            account_id = %account.account_id,
            balance = %account.balance,
            currency = %account.currency,
            "Account opened"
        );

        Ok(account)
    }

    fn reserve(
        &self,
        transfer_id: TransferId,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<ReserveOutcome> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!("cannot reserve {}", amount)));
        }

        if self.storage.get_marker(&transfer_id)?.is_some() {
            self.metrics.record_reservation("already_settled");
            return Ok(ReserveOutcome::AlreadySettled);
        }

        if self.storage.get_release(&transfer_id)?.is_some() {
            self.metrics.record_reservation("released");
            tracing::warn!(
                transfer_id = %transfer_id,
                account_id = %account_id,
                "Reserve arrived after release, refused"
            );
            return Ok(ReserveOutcome::Released);
        }

        let mut account = match self.storage.get_account(&account_id)? {
            Some(account) => account,
            None => {
                self.metrics.record_reservation("unknown_account");
                return Ok(ReserveOutcome::UnknownAccount);
            }
        };

        if self.storage.get_hold(&transfer_id)?.is_some() {
            self.metrics.record_reservation("already_held");
            return Ok(ReserveOutcome::AlreadyHeld {
                available: account.available(),
            });
        }

        if account.available() < amount {
            self.metrics.record_reservation("insufficient");
            tracing::debug!(
                transfer_id = %transfer_id,
                account_id = %account_id,
                available = %account.available(),
                amount = %amount,
                "Reservation denied"
            );
            return Ok(ReserveOutcome::Insufficient {
                available: account.available(),
            });
        }

        let now = Utc::now();
        account.held += amount;
        account.updated_at = now;
        let available = account.available();

        self.storage.commit(LedgerBatch {
            accounts: vec![account],
            put_holds: vec![Hold {
                transfer_id,
                account_id,
                amount,
                placed_at: now,
            }],
            ..Default::default()
        })?;

        self.metrics.record_reservation("reserved");
        tracing::debug!(
            transfer_id = %transfer_id,
            account_id = %account_id,
            amount = %amount,
            available = %available,
            "Funds reserved"
        );

        Ok(ReserveOutcome::Reserved { available })
    }

    fn release(&self, transfer_id: TransferId) -> Result<bool> {
        // a settled transfer already refuses reserves
        if self.storage.get_marker(&transfer_id)?.is_some() {
            return Ok(false);
        }

        let now = Utc::now();
        let hold = self.storage.get_hold(&transfer_id)?;
        let mut batch = LedgerBatch {
            releases: vec![ReleaseMarker {
                transfer_id,
                dropped_hold: hold.is_some(),
                released_at: now,
            }],
            ..Default::default()
        };

        if let Some(hold) = &hold {
            batch.remove_holds.push(transfer_id);
            if let Some(mut account) = self.storage.get_account(&hold.account_id)? {
                account.release_hold(hold.amount);
                account.updated_at = now;
                batch.accounts.push(account);
            }
        }

        self.storage.commit(batch)?;

        match hold {
            Some(hold) => {
                tracing::debug!(transfer_id = %transfer_id, amount = %hold.amount, "Hold released");
                Ok(true)
            }
            None => {
                tracing::debug!(transfer_id = %transfer_id, "Release recorded ahead of reserve");
                Ok(false)
            }
        }
    }

    fn apply_settlement(&self, event: &SettlementEvent) -> Result<ApplyOutcome> {
        let started = Instant::now();

        if event.amount <= Decimal::ZERO {
            return Err(Error::InvalidSettlement(format!(
                "non-positive amount {}",
                event.amount
            )));
        }
        if event.sender_id == event.receiver_id {
            return Err(Error::InvalidSettlement("sender equals receiver".to_string()));
        }

        if self.storage.get_marker(&event.transfer_id)?.is_some() {
            self.metrics.record_duplicate();
            return Ok(ApplyOutcome::Duplicate);
        }

        let mut sender = self
            .storage
            .get_account(&event.sender_id)?
            .ok_or(Error::AccountNotFound(event.sender_id))?;
        let mut receiver = self
            .storage
            .get_account(&event.receiver_id)?
            .ok_or(Error::AccountNotFound(event.receiver_id))?;

        if sender.currency != receiver.currency {
            return Err(Error::CurrencyMismatch {
                sender: sender.currency,
                receiver: receiver.currency,
            });
        }

        let mut batch = LedgerBatch::default();

        // The hold placed at admission is consumed by the debit
        if let Some(hold) = self.storage.get_hold(&event.transfer_id)? {
            if hold.account_id == sender.account_id {
                sender.release_hold(hold.amount);
            }
            batch.remove_holds.push(event.transfer_id);
        }

        let now = Utc::now();
        sender.balance -= event.amount;
        sender.updated_at = now;
        receiver.balance += event.amount;
        receiver.updated_at = now;

        let overdraft = sender.is_overdrawn();
        let outcome = ApplyOutcome::Applied {
            sender_balance: sender.balance,
            receiver_balance: receiver.balance,
            overdraft,
        };

        batch.accounts.push(sender);
        batch.accounts.push(receiver);
        batch.markers.push(SettlementMarker {
            transfer_id: event.transfer_id,
            sender_id: event.sender_id,
            receiver_id: event.receiver_id,
            amount: event.amount,
            applied_at: now,
        });

        self.storage.commit(batch)?;

        self.metrics
            .record_applied(overdraft, started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    fn expire_holds(&self, cutoff: DateTime<Utc>, keep: &HashSet<TransferId>) -> Result<Vec<Hold>> {
        let expired: Vec<Hold> = self
            .storage
            .list_holds()?
            .into_iter()
            .filter(|hold| hold.placed_at < cutoff && !keep.contains(&hold.transfer_id))
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }

        let mut accounts: HashMap<AccountId, AccountBalance> = HashMap::new();
        for hold in &expired {
            if !accounts.contains_key(&hold.account_id) {
                if let Some(account) = self.storage.get_account(&hold.account_id)? {
                    accounts.insert(hold.account_id, account);
                }
            }
            if let Some(account) = accounts.get_mut(&hold.account_id) {
                account.release_hold(hold.amount);
                account.updated_at = Utc::now();
            }
        }

        self.storage.commit(LedgerBatch {
            accounts: accounts.into_values().collect(),
            remove_holds: expired.iter().map(|h| h.transfer_id).collect(),
            ..Default::default()
        })?;

        self.metrics.record_holds_expired(expired.len());
        Ok(expired)
    }

    fn prune_releases(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let stale: Vec<TransferId> = self
            .storage
            .list_releases()?
            .into_iter()
            .filter(|release| release.released_at < cutoff)
            .map(|release| release.transfer_id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let pruned = stale.len();
        self.storage.commit(LedgerBatch {
            remove_releases: stale,
            ..Default::default()
        })?;
        Ok(pruned)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Open an account; `if_missing` returns an existing record instead of failing
    pub async fn open_account(
        &self,
        account: AccountBalance,
        if_missing: bool,
    ) -> Result<AccountBalance> {
        self.request(|response| LedgerMessage::OpenAccount {
            account,
            if_missing,
            response,
        })
        .await
    }

    /// Atomic check-and-hold
    pub async fn reserve(
        &self,
        transfer_id: TransferId,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<ReserveOutcome> {
        self.request(|response| LedgerMessage::Reserve {
            transfer_id,
            account_id,
            amount,
            response,
        })
        .await
    }

    /// Drop a hold; later reserves for the transfer are refused
    pub async fn release(&self, transfer_id: TransferId) -> Result<bool> {
        self.request(|response| LedgerMessage::Release {
            transfer_id,
            response,
        })
        .await
    }

    /// Apply a settlement event
    pub async fn apply_settlement(&self, event: SettlementEvent) -> Result<ApplyOutcome> {
        self.request(|response| LedgerMessage::ApplySettlement { event, response })
            .await
    }

    /// Release holds placed before `cutoff` that are not in `keep`
    pub async fn expire_holds(
        &self,
        cutoff: DateTime<Utc>,
        keep: HashSet<TransferId>,
    ) -> Result<Vec<Hold>> {
        self.request(|response| LedgerMessage::ExpireHolds {
            cutoff,
            keep,
            response,
        })
        .await
    }

    /// Forget release markers written before `cutoff`
    pub async fn prune_releases(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.request(|response| LedgerMessage::PruneReleases { cutoff, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<dyn LedgerStorage>,
    metrics: Arc<Metrics>,
    mailbox_capacity: usize,
) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1)); // Bounded channel for backpressure
    let actor = LedgerActor::new(storage, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use protocol::Currency;
    use rust_decimal_macros::dec;

    fn spawn() -> (LedgerHandle, Arc<dyn LedgerStorage>) {
        let storage: Arc<dyn LedgerStorage> = Arc::new(MemoryStorage::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        (spawn_ledger_actor(storage.clone(), metrics, 16), storage)
    }

    async fn open(handle: &LedgerHandle, balance: Decimal) -> AccountId {
        let account = AccountBalance::new(AccountId::random(), balance, Currency::USD);
        handle.open_account(account, false).await.unwrap().account_id
    }

    fn event(sender: AccountId, receiver: AccountId, amount: Decimal) -> SettlementEvent {
        SettlementEvent::new(TransferId::generate(), sender, receiver, amount, Utc::now())
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let (handle, _) = spawn();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_mailbox_is_concurrency_error() {
        let (handle, _) = spawn();
        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        // the actor may still be draining; retry until the mailbox is gone
        let mut result = handle.release(TransferId::generate()).await;
        for _ in 0..10 {
            if result.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            result = handle.release(TransferId::generate()).await;
        }
        assert!(matches!(result, Err(Error::Concurrency(_))));
    }

    #[tokio::test]
    async fn test_open_account_twice() {
        let (handle, _) = spawn();
        let account = AccountBalance::new(AccountId::random(), dec!(10), Currency::USD);

        handle.open_account(account.clone(), false).await.unwrap();
        let err = handle.open_account(account.clone(), false).await.unwrap_err();
        assert!(matches!(err, Error::AccountExists(_)));

        let mut other = account.clone();
        other.balance = dec!(999);
        let existing = handle.open_account(other, true).await.unwrap();
        assert_eq!(existing.balance, dec!(10));
    }

    #[tokio::test]
    async fn test_negative_opening_balance_rejected() {
        let (handle, _) = spawn();
        let account = AccountBalance::new(AccountId::random(), dec!(-1), Currency::USD);
        let err = handle.open_account(account, false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_apply_moves_funds_once() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100.00)).await;
        let receiver = open(&handle, dec!(0)).await;
        let event = event(sender, receiver, dec!(50.00));

        let outcome = handle.apply_settlement(event.clone()).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                sender_balance: dec!(50.00),
                receiver_balance: dec!(50.00),
                overdraft: false,
            }
        );

        let replay = handle.apply_settlement(event).await.unwrap();
        assert_eq!(replay, ApplyOutcome::Duplicate);

        assert_eq!(storage.get_account(&sender).unwrap().unwrap().balance, dec!(50.00));
        assert_eq!(storage.get_account(&receiver).unwrap().unwrap().balance, dec!(50.00));
    }

    #[tokio::test]
    async fn test_apply_is_unconditional_and_flags_overdraft() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(30.00)).await;
        let receiver = open(&handle, dec!(0)).await;

        let outcome = handle
            .apply_settlement(event(sender, receiver, dec!(50.00)))
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { overdraft: true, .. }));
        assert!(storage.get_account(&sender).unwrap().unwrap().is_overdrawn());
    }

    #[tokio::test]
    async fn test_apply_unknown_account_changes_nothing() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100)).await;
        let event = event(sender, AccountId::random(), dec!(10));

        let err = handle.apply_settlement(event.clone()).await.unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
        assert_eq!(storage.get_account(&sender).unwrap().unwrap().balance, dec!(100));
        assert!(storage.get_marker(&event.transfer_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_currency_mismatch() {
        let (handle, _) = spawn();
        let sender = open(&handle, dec!(100)).await;
        let receiver = handle
            .open_account(
                AccountBalance::new(AccountId::random(), dec!(0), Currency::EUR),
                false,
            )
            .await
            .unwrap()
            .account_id;

        let err = handle
            .apply_settlement(event(sender, receiver, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn test_reserve_then_settle_consumes_hold() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100)).await;
        let receiver = open(&handle, dec!(0)).await;
        let event = event(sender, receiver, dec!(60));

        let outcome = handle
            .reserve(event.transfer_id, sender, dec!(60))
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::Reserved { available: dec!(40) });

        // a second transfer cannot claim the held funds
        let second = handle
            .reserve(TransferId::generate(), sender, dec!(60))
            .await
            .unwrap();
        assert_eq!(second, ReserveOutcome::Insufficient { available: dec!(40) });

        // repeated reserve for the same transfer does not double the hold
        let again = handle
            .reserve(event.transfer_id, sender, dec!(60))
            .await
            .unwrap();
        assert_eq!(again, ReserveOutcome::AlreadyHeld { available: dec!(40) });

        handle.apply_settlement(event.clone()).await.unwrap();
        let account = storage.get_account(&sender).unwrap().unwrap();
        assert_eq!(account.balance, dec!(40));
        assert_eq!(account.held, Decimal::ZERO);
        assert!(storage.get_hold(&event.transfer_id).unwrap().is_none());

        let late = handle
            .reserve(event.transfer_id, sender, dec!(60))
            .await
            .unwrap();
        assert_eq!(late, ReserveOutcome::AlreadySettled);
    }

    #[tokio::test]
    async fn test_reserve_unknown_account() {
        let (handle, _) = spawn();
        let outcome = handle
            .reserve(TransferId::generate(), AccountId::random(), dec!(1))
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::UnknownAccount);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100)).await;
        let transfer_id = TransferId::generate();

        handle.reserve(transfer_id, sender, dec!(25)).await.unwrap();
        assert!(handle.release(transfer_id).await.unwrap());
        assert!(!handle.release(transfer_id).await.unwrap());
        assert_eq!(storage.get_account(&sender).unwrap().unwrap().held, Decimal::ZERO);

        // a retried reserve for the released transfer does not hold again
        let retried = handle.reserve(transfer_id, sender, dec!(25)).await.unwrap();
        assert_eq!(retried, ReserveOutcome::Released);
        assert_eq!(storage.get_account(&sender).unwrap().unwrap().held, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_release_ahead_of_reserve_blocks_the_hold() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100)).await;
        let transfer_id = TransferId::generate();

        assert!(!handle.release(transfer_id).await.unwrap());
        let marker = storage.get_release(&transfer_id).unwrap().unwrap();
        assert!(!marker.dropped_hold);

        let late = handle.reserve(transfer_id, sender, dec!(50)).await.unwrap();
        assert_eq!(late, ReserveOutcome::Released);
        assert!(storage.list_holds().unwrap().is_empty());
        assert_eq!(storage.get_account(&sender).unwrap().unwrap().available(), dec!(100));
    }

    #[tokio::test]
    async fn test_release_after_settlement_leaves_no_marker() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100)).await;
        let receiver = open(&handle, dec!(0)).await;
        let event = event(sender, receiver, dec!(10));

        handle.apply_settlement(event.clone()).await.unwrap();
        assert!(!handle.release(event.transfer_id).await.unwrap());
        assert!(storage.get_release(&event.transfer_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_releases_before_cutoff() {
        let (handle, storage) = spawn();
        handle.release(TransferId::generate()).await.unwrap();
        handle.release(TransferId::generate()).await.unwrap();

        let none = handle
            .prune_releases(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(none, 0);

        let pruned = handle
            .prune_releases(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(pruned, 2);
        assert!(storage.list_releases().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_holds_before_cutoff() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(100)).await;

        let kept = TransferId::generate();
        handle.reserve(TransferId::generate(), sender, dec!(10)).await.unwrap();
        handle.reserve(TransferId::generate(), sender, dec!(15)).await.unwrap();
        handle.reserve(kept, sender, dec!(5)).await.unwrap();

        let none = handle
            .expire_holds(Utc::now() - chrono::Duration::hours(1), HashSet::new())
            .await
            .unwrap();
        assert!(none.is_empty());

        let expired = handle
            .expire_holds(
                Utc::now() + chrono::Duration::seconds(1),
                HashSet::from([kept]),
            )
            .await
            .unwrap();
        assert_eq!(expired.len(), 2);
        assert_eq!(storage.get_account(&sender).unwrap().unwrap().held, dec!(5));
        assert_eq!(storage.list_holds().unwrap().len(), 1);
        assert!(storage.get_hold(&kept).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_applies_do_not_lose_updates() {
        let (handle, storage) = spawn();
        let sender = open(&handle, dec!(1000)).await;
        let receiver = open(&handle, dec!(0)).await;

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .apply_settlement(event(sender, receiver, dec!(10)))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(storage.get_account(&sender).unwrap().unwrap().balance, dec!(500));
        assert_eq!(storage.get_account(&receiver).unwrap().unwrap().balance, dec!(500));
    }
}
