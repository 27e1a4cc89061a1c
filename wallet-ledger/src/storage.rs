//! Storage layer
//!
//! [`LedgerStorage`] is the seam between the writer actor and the backend.
//! Reads are point lookups or full scans; writes arrive as one
//! [`LedgerBatch`] that must commit atomically.
//!
//! # Backends
//!
//! - [`MemoryStorage`] - process-local, one lock around all maps
//! - [`crate::rocks::RocksStorage`] - RocksDB column families (feature `rocksdb`)

use crate::{
    config::StorageBackend,
    error::Result,
    types::{AccountBalance, Hold, ReleaseMarker, SettlementMarker},
    Config,
};
use parking_lot::RwLock;
use protocol::{AccountId, TransferId};
use std::collections::HashMap;
use std::sync::Arc;

/// One atomic unit of ledger writes
#[derive(Debug, Default, Clone)]
pub struct LedgerBatch {
    /// Account records to upsert
    pub accounts: Vec<AccountBalance>,

    /// Holds to insert
    pub put_holds: Vec<Hold>,

    /// Holds to delete
    pub remove_holds: Vec<TransferId>,

    /// Settlement markers to insert
    pub markers: Vec<SettlementMarker>,

    /// Release markers to insert
    pub releases: Vec<ReleaseMarker>,

    /// Release markers to delete
    pub remove_releases: Vec<TransferId>,
}

impl LedgerBatch {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.put_holds.is_empty()
            && self.remove_holds.is_empty()
            && self.markers.is_empty()
            && self.releases.is_empty()
            && self.remove_releases.is_empty()
    }
}

/// Ledger storage backend
pub trait LedgerStorage: Send + Sync {
    /// Account by id
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>>;

    /// Every account
    fn list_accounts(&self) -> Result<Vec<AccountBalance>>;

    /// Hold by transfer id
    fn get_hold(&self, transfer_id: &TransferId) -> Result<Option<Hold>>;

    /// Every open hold
    fn list_holds(&self) -> Result<Vec<Hold>>;

    /// Settlement marker by transfer id
    fn get_marker(&self, transfer_id: &TransferId) -> Result<Option<SettlementMarker>>;

    /// Release marker by transfer id
    fn get_release(&self, transfer_id: &TransferId) -> Result<Option<ReleaseMarker>>;

    /// Every release marker
    fn list_releases(&self) -> Result<Vec<ReleaseMarker>>;

    /// Write the whole batch or nothing
    fn commit(&self, batch: LedgerBatch) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<AccountId, AccountBalance>,
    holds: HashMap<TransferId, Hold>,
    markers: HashMap<TransferId, SettlementMarker>,
    releases: HashMap<TransferId, ReleaseMarker>,
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStorage for MemoryStorage {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        Ok(self.state.read().accounts.get(account_id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<AccountBalance>> {
        let mut accounts: Vec<_> = self.state.read().accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.account_id);
        Ok(accounts)
    }

    fn get_hold(&self, transfer_id: &TransferId) -> Result<Option<Hold>> {
        Ok(self.state.read().holds.get(transfer_id).cloned())
    }

    fn list_holds(&self) -> Result<Vec<Hold>> {
        let mut holds: Vec<_> = self.state.read().holds.values().cloned().collect();
        holds.sort_by_key(|h| h.transfer_id);
        Ok(holds)
    }

    fn get_marker(&self, transfer_id: &TransferId) -> Result<Option<SettlementMarker>> {
        Ok(self.state.read().markers.get(transfer_id).cloned())
    }

    fn get_release(&self, transfer_id: &TransferId) -> Result<Option<ReleaseMarker>> {
        Ok(self.state.read().releases.get(transfer_id).cloned())
    }

    fn list_releases(&self) -> Result<Vec<ReleaseMarker>> {
        let mut releases: Vec<_> = self.state.read().releases.values().cloned().collect();
        releases.sort_by_key(|r| r.released_at);
        Ok(releases)
    }

    fn commit(&self, batch: LedgerBatch) -> Result<()> {
        let mut state = self.state.write();

        for account in batch.accounts {
            state.accounts.insert(account.account_id, account);
        }
        for transfer_id in batch.remove_holds {
            state.holds.remove(&transfer_id);
        }
        for hold in batch.put_holds {
            state.holds.insert(hold.transfer_id, hold);
        }
        for marker in batch.markers {
            state.markers.insert(marker.transfer_id, marker);
        }
        for transfer_id in batch.remove_releases {
            state.releases.remove(&transfer_id);
        }
        for release in batch.releases {
            state.releases.insert(release.transfer_id, release);
        }

        Ok(())
    }
}

/// Open the backend selected by `config`
pub fn open_storage(config: &Config) -> Result<Arc<dyn LedgerStorage>> {
    match config.storage {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory ledger storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        #[cfg(feature = "rocksdb")]
        StorageBackend::RocksDb => Ok(Arc::new(crate::rocks::RocksStorage::open(config)?)),
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::RocksDb => Err(crate::Error::Config(
            "RocksDB storage requested but the `rocksdb` feature is disabled".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use protocol::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_commit_and_read_back() {
        let storage = MemoryStorage::new();
        let account = AccountBalance::new(AccountId::random(), dec!(100), Currency::USD);
        let transfer_id = TransferId::generate();

        storage
            .commit(LedgerBatch {
                accounts: vec![account.clone()],
                put_holds: vec![Hold {
                    transfer_id,
                    account_id: account.account_id,
                    amount: dec!(10),
                    placed_at: Utc::now(),
                }],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            storage.get_account(&account.account_id).unwrap(),
            Some(account.clone())
        );
        assert_eq!(storage.list_holds().unwrap().len(), 1);
        assert!(storage.get_marker(&transfer_id).unwrap().is_none());

        storage
            .commit(LedgerBatch {
                remove_holds: vec![transfer_id],
                markers: vec![SettlementMarker {
                    transfer_id,
                    sender_id: account.account_id,
                    receiver_id: AccountId::random(),
                    amount: dec!(10),
                    applied_at: Utc::now(),
                }],
                ..Default::default()
            })
            .unwrap();

        assert!(storage.get_hold(&transfer_id).unwrap().is_none());
        assert!(storage.get_marker(&transfer_id).unwrap().is_some());
    }

    #[test]
    fn test_release_markers_put_and_remove() {
        let storage = MemoryStorage::new();
        let transfer_id = TransferId::generate();

        storage
            .commit(LedgerBatch {
                releases: vec![ReleaseMarker {
                    transfer_id,
                    dropped_hold: false,
                    released_at: Utc::now(),
                }],
                ..Default::default()
            })
            .unwrap();
        assert!(storage.get_release(&transfer_id).unwrap().is_some());
        assert_eq!(storage.list_releases().unwrap().len(), 1);

        storage
            .commit(LedgerBatch {
                remove_releases: vec![transfer_id],
                ..Default::default()
            })
            .unwrap();
        assert!(storage.list_releases().unwrap().is_empty());
    }

    #[test]
    fn test_missing_records_are_none() {
        let storage = MemoryStorage::new();
        assert!(storage.get_account(&AccountId::random()).unwrap().is_none());
        assert!(storage.list_accounts().unwrap().is_empty());
        assert!(LedgerBatch::default().is_empty());
    }

    #[cfg(not(feature = "rocksdb"))]
    #[test]
    fn test_rocksdb_backend_requires_feature() {
        let config = Config {
            storage: StorageBackend::RocksDb,
            ..Config::default()
        };
        assert!(open_storage(&config).is_err());
    }
}
