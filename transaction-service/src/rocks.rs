//! RocksDB transaction store
//!
//! # Column Families
//!
//! - `transfers` - Transfer records (key: transfer_id)
//! - `account_index` - History index (key: account_id || time || transfer_id)
//! - `outbox` - Pending settlement events (key: time || transfer_id)
//!
//! `time` is the record's `created_at` in microseconds, big-endian with the
//! sign bit flipped so byte order equals time order.

use crate::{
    error::{Error, Result},
    store::{newest_first, OutboxEntry, TransactionStore},
    Config,
};
use chrono::{DateTime, Utc};
use protocol::{AccountId, TransferId, TransferRecord};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};

/// Column family names
const CF_TRANSFERS: &str = "transfers";
const CF_ACCOUNT_INDEX: &str = "account_index";
const CF_OUTBOX: &str = "outbox";

/// Storage wrapper for RocksDB
pub struct RocksStore {
    db: DB,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_transfers()),
            ColumnFamilyDescriptor::new(CF_ACCOUNT_INDEX, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_OUTBOX, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB transaction storage");

        Ok(Self {
            db,
            sync_writes: config.sync_writes,
        })
    }

    fn cf_options_transfers() -> Options {
        let mut opts = Options::default();
        // Append-only, read by id; compress well
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Index scans are prefix scans on the account id
        opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    // Key helpers

    fn time_key(at: &DateTime<Utc>) -> [u8; 8] {
        ((at.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
    }

    fn outbox_key(created_at: &DateTime<Utc>, transfer_id: &TransferId) -> Vec<u8> {
        let mut key = Self::time_key(created_at).to_vec();
        key.extend_from_slice(transfer_id.as_bytes());
        key
    }

    fn index_key(account: &AccountId, record: &TransferRecord) -> Vec<u8> {
        let mut key = account.as_bytes().to_vec();
        key.extend_from_slice(&Self::time_key(&record.created_at));
        key.extend_from_slice(record.id.as_bytes());
        key
    }

    /// Stage the record and its index rows, refusing an existing id
    fn stage_record(&self, batch: &mut WriteBatch, record: &TransferRecord) -> Result<()> {
        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;
        if self.db.get_cf(cf_transfers, record.id.as_bytes())?.is_some() {
            return Err(Error::DuplicateRecord(record.id));
        }
        batch.put_cf(cf_transfers, record.id.as_bytes(), bincode::serialize(record)?);

        let cf_index = self.cf_handle(CF_ACCOUNT_INDEX)?;
        batch.put_cf(cf_index, Self::index_key(&record.sender_id, record), b"");
        batch.put_cf(cf_index, Self::index_key(&record.receiver_id, record), b"");
        Ok(())
    }

    /// Outbox key of a pending entry, if the record exists and its entry is still there
    fn pending_key(&self, transfer_id: &TransferId) -> Result<Option<Vec<u8>>> {
        let record = match self.get(transfer_id)? {
            Some(record) => record,
            None => return Ok(None),
        };
        let key = Self::outbox_key(&record.created_at, transfer_id);
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        Ok(self.db.get_cf(cf_outbox, &key)?.map(|_| key))
    }
}

impl TransactionStore for RocksStore {
    fn insert_with_outbox(&self, record: &TransferRecord, entry: &OutboxEntry) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_record(&mut batch, record)?;

        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        batch.put_cf(
            cf_outbox,
            Self::outbox_key(&record.created_at, &record.id),
            bincode::serialize(entry)?,
        );

        // Atomic commit
        self.write(batch)
    }

    fn insert(&self, record: &TransferRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_record(&mut batch, record)?;
        self.write(batch)
    }

    fn get(&self, transfer_id: &TransferId) -> Result<Option<TransferRecord>> {
        let cf = self.cf_handle(CF_TRANSFERS)?;
        match self.db.get_cf(cf, transfer_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn history(&self, account: &AccountId) -> Result<Vec<TransferRecord>> {
        let cf_index = self.cf_handle(CF_ACCOUNT_INDEX)?;
        let prefix = account.as_bytes();

        let mut records = Vec::new();
        for item in self
            .db
            .iterator_cf(cf_index, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item?;
            // The iterator runs past the prefix; stop at the first foreign key
            if !key.starts_with(prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[key.len() - 16..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed account index key".to_string()))?;
            let transfer_id = TransferId::from_uuid(uuid::Uuid::from_bytes(id_bytes));
            if let Some(record) = self.get(&transfer_id)? {
                records.push(record);
            }
        }

        records.sort_by(newest_first);
        Ok(records)
    }

    fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf_outbox, IteratorMode::Start).take(limit) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    fn mark_published(&self, transfer_id: &TransferId) -> Result<bool> {
        let key = match self.pending_key(transfer_id)? {
            Some(key) => key,
            None => return Ok(false),
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf_handle(CF_OUTBOX)?, key);
        self.write(batch)?;
        Ok(true)
    }

    fn record_publish_failure(&self, transfer_id: &TransferId, error: &str) -> Result<()> {
        let key = self
            .pending_key(transfer_id)?
            .ok_or_else(|| Error::Storage(format!("No outbox entry for {}", transfer_id)))?;
        let cf_outbox = self.cf_handle(CF_OUTBOX)?;

        let bytes = self
            .db
            .get_cf(cf_outbox, &key)?
            .ok_or_else(|| Error::Storage(format!("No outbox entry for {}", transfer_id)))?;
        let mut entry: OutboxEntry = bincode::deserialize(&bytes)?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_outbox, key, bincode::serialize(&entry)?);
        self.write(batch)
    }
}
