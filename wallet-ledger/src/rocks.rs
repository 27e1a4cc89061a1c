//! RocksDB storage backend
//!
//! # Column Families
//!
//! - `accounts` - Account balances (key: account_id)
//! - `holds` - Open holds (key: transfer_id)
//! - `settlements` - Processed-settlement markers (key: transfer_id)
//! - `releases` - Release markers (key: transfer_id)

use crate::{
    error::{Error, Result},
    storage::{LedgerBatch, LedgerStorage},
    types::{AccountBalance, Hold, ReleaseMarker, SettlementMarker},
    Config,
};
use protocol::{AccountId, TransferId};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::de::DeserializeOwned;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_HOLDS: &str = "holds";
const CF_SETTLEMENTS: &str = "settlements";
const CF_RELEASES: &str = "releases";

/// Storage wrapper for RocksDB
pub struct RocksStorage {
    db: DB,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStorage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStorage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_HOLDS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_SETTLEMENTS, Self::cf_options_settlements()),
            ColumnFamilyDescriptor::new(CF_RELEASES, Self::cf_options_settlements()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger storage");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Read on every transfer, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_settlements() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        // Dedup lookups are mostly misses
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }
}

impl LedgerStorage for RocksStorage {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        self.get_value(CF_ACCOUNTS, account_id.as_bytes())
    }

    fn list_accounts(&self) -> Result<Vec<AccountBalance>> {
        self.scan(CF_ACCOUNTS)
    }

    fn get_hold(&self, transfer_id: &TransferId) -> Result<Option<Hold>> {
        self.get_value(CF_HOLDS, transfer_id.as_bytes())
    }

    fn list_holds(&self) -> Result<Vec<Hold>> {
        self.scan(CF_HOLDS)
    }

    fn get_marker(&self, transfer_id: &TransferId) -> Result<Option<SettlementMarker>> {
        self.get_value(CF_SETTLEMENTS, transfer_id.as_bytes())
    }

    fn get_release(&self, transfer_id: &TransferId) -> Result<Option<ReleaseMarker>> {
        self.get_value(CF_RELEASES, transfer_id.as_bytes())
    }

    fn list_releases(&self) -> Result<Vec<ReleaseMarker>> {
        let mut releases: Vec<ReleaseMarker> = self.scan(CF_RELEASES)?;
        releases.sort_by_key(|r| r.released_at);
        Ok(releases)
    }

    fn commit(&self, batch: LedgerBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        let cf_holds = self.cf_handle(CF_HOLDS)?;
        let cf_settlements = self.cf_handle(CF_SETTLEMENTS)?;
        let cf_releases = self.cf_handle(CF_RELEASES)?;

        let mut write = WriteBatch::default();

        for account in &batch.accounts {
            write.put_cf(cf_accounts, account.account_id.as_bytes(), bincode::serialize(account)?);
        }
        for transfer_id in &batch.remove_holds {
            write.delete_cf(cf_holds, transfer_id.as_bytes());
        }
        for hold in &batch.put_holds {
            write.put_cf(cf_holds, hold.transfer_id.as_bytes(), bincode::serialize(hold)?);
        }
        for marker in &batch.markers {
            write.put_cf(cf_settlements, marker.transfer_id.as_bytes(), bincode::serialize(marker)?);
        }
        for transfer_id in &batch.remove_releases {
            write.delete_cf(cf_releases, transfer_id.as_bytes());
        }
        for release in &batch.releases {
            write.put_cf(cf_releases, release.transfer_id.as_bytes(), bincode::serialize(release)?);
        }

        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db.write_opt(write, &opts)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use protocol::Currency;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = RocksStorage::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_ACCOUNTS).is_some());
        assert!(storage.db.cf_handle(CF_SETTLEMENTS).is_some());
        assert!(storage.db.cf_handle(CF_RELEASES).is_some());
    }

    #[test]
    fn test_batch_survives_reopen() {
        let (config, _temp) = test_config();
        let account = AccountBalance::new(AccountId::random(), dec!(42.50), Currency::GBP);
        let transfer_id = TransferId::generate();

        {
            let storage = RocksStorage::open(&config).unwrap();
            storage
                .commit(LedgerBatch {
                    accounts: vec![account.clone()],
                    markers: vec![SettlementMarker {
                        transfer_id,
                        sender_id: account.account_id,
                        receiver_id: AccountId::random(),
                        amount: dec!(1),
                        applied_at: Utc::now(),
                    }],
                    ..Default::default()
                })
                .unwrap();
        }

        let storage = RocksStorage::open(&config).unwrap();
        storage
            .commit(LedgerBatch {
                releases: vec![ReleaseMarker {
                    transfer_id: TransferId::generate(),
                    dropped_hold: false,
                    released_at: Utc::now(),
                }],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(storage.list_releases().unwrap().len(), 1);
        assert_eq!(storage.get_account(&account.account_id).unwrap(), Some(account));
        assert!(storage.get_marker(&transfer_id).unwrap().is_some());
        assert_eq!(storage.list_accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_hold_removal() {
        let (config, _temp) = test_config();
        let storage = RocksStorage::open(&config).unwrap();
        let hold = Hold {
            transfer_id: TransferId::generate(),
            account_id: AccountId::random(),
            amount: dec!(5),
            placed_at: Utc::now(),
        };

        storage
            .commit(LedgerBatch {
                put_holds: vec![hold.clone()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(storage.get_hold(&hold.transfer_id).unwrap(), Some(hold.clone()));

        storage
            .commit(LedgerBatch {
                remove_holds: vec![hold.transfer_id],
                ..Default::default()
            })
            .unwrap();
        assert!(storage.list_holds().unwrap().is_empty());
    }
}
