//! Transaction ledger
//!
//! Transfer records plus the outbox of settlement events still to publish.
//! A COMPLETED record and its outbox entry are written together or not at
//! all, so a crash can never leave a completed transfer without an event.
//!
//! # Backends
//!
//! - [`MemoryStore`] - process-local, one lock around all maps
//! - [`crate::rocks::RocksStore`] - RocksDB column families (feature `rocksdb`)

use crate::{
    config::StorageBackend,
    error::{Error, Result},
    Config,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use protocol::{AccountId, SettlementEvent, TransferId, TransferRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Settlement event waiting to be published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Transfer the event announces
    pub transfer_id: TransferId,

    /// Event payload
    pub event: SettlementEvent,

    /// Written with the record; defines relay order
    pub created_at: DateTime<Utc>,

    /// Failed publish attempts so far
    pub attempts: u32,

    /// Last publish failure
    pub last_error: Option<String>,
}

impl OutboxEntry {
    /// Entry for a freshly written COMPLETED record
    pub fn for_record(record: &TransferRecord) -> Self {
        Self {
            transfer_id: record.id,
            event: record.settlement_event(),
            created_at: record.created_at,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Newest first: `created_at` descending, ties by id descending
pub(crate) fn newest_first(a: &TransferRecord, b: &TransferRecord) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

/// Transaction ledger backend
pub trait TransactionStore: Send + Sync {
    /// Write a COMPLETED record and its outbox entry atomically
    fn insert_with_outbox(&self, record: &TransferRecord, entry: &OutboxEntry) -> Result<()>;

    /// Write a record with no outbox entry
    fn insert(&self, record: &TransferRecord) -> Result<()>;

    /// Record by id
    fn get(&self, transfer_id: &TransferId) -> Result<Option<TransferRecord>>;

    /// Every record involving `account`, newest first
    fn history(&self, account: &AccountId) -> Result<Vec<TransferRecord>>;

    /// Up to `limit` unpublished entries, oldest first
    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Drop the entry once its event is on the channel; false if it was not pending
    fn mark_published(&self, transfer_id: &TransferId) -> Result<bool>;

    /// Count a failed publish attempt
    fn record_publish_failure(&self, transfer_id: &TransferId, error: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<TransferId, TransferRecord>,
    by_account: HashMap<AccountId, Vec<TransferId>>,
    outbox: BTreeMap<u64, OutboxEntry>,
    outbox_seq: HashMap<TransferId, u64>,
    next_seq: u64,
}

impl MemoryState {
    fn put_record(&mut self, record: &TransferRecord) -> Result<()> {
        if self.records.contains_key(&record.id) {
            return Err(Error::DuplicateRecord(record.id));
        }
        self.records.insert(record.id, record.clone());
        self.by_account
            .entry(record.sender_id)
            .or_default()
            .push(record.id);
        if record.receiver_id != record.sender_id {
            self.by_account
                .entry(record.receiver_id)
                .or_default()
                .push(record.id);
        }
        Ok(())
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionStore for MemoryStore {
    fn insert_with_outbox(&self, record: &TransferRecord, entry: &OutboxEntry) -> Result<()> {
        let mut state = self.state.write();
        state.put_record(record)?;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.outbox.insert(seq, entry.clone());
        state.outbox_seq.insert(entry.transfer_id, seq);
        Ok(())
    }

    fn insert(&self, record: &TransferRecord) -> Result<()> {
        self.state.write().put_record(record)
    }

    fn get(&self, transfer_id: &TransferId) -> Result<Option<TransferRecord>> {
        Ok(self.state.read().records.get(transfer_id).cloned())
    }

    fn history(&self, account: &AccountId) -> Result<Vec<TransferRecord>> {
        let state = self.state.read();
        let mut records: Vec<TransferRecord> = state
            .by_account
            .get(account)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(newest_first);
        Ok(records)
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        Ok(self
            .state
            .read()
            .outbox
            .values()
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_published(&self, transfer_id: &TransferId) -> Result<bool> {
        let mut state = self.state.write();
        match state.outbox_seq.remove(transfer_id) {
            Some(seq) => Ok(state.outbox.remove(&seq).is_some()),
            None => Ok(false),
        }
    }

    fn record_publish_failure(&self, transfer_id: &TransferId, error: &str) -> Result<()> {
        let mut state = self.state.write();
        let seq = state
            .outbox_seq
            .get(transfer_id)
            .copied()
            .ok_or_else(|| Error::Storage(format!("No outbox entry for {}", transfer_id)))?;
        if let Some(entry) = state.outbox.get_mut(&seq) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

/// Open the backend selected by `config`
pub fn open_store(config: &Config) -> Result<Arc<dyn TransactionStore>> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory transaction storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb")]
        StorageBackend::RocksDb => Ok(Arc::new(crate::rocks::RocksStore::open(config)?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::RocksDb => Err(Error::Config(
            "RocksDB storage requested but the `rocksdb` feature is disabled".to_string(),
        )),
    }
}
