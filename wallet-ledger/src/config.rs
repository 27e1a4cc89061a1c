//! Configuration for the wallet ledger

use protocol::{AccountId, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; lost on restart
    #[default]
    Memory,
    /// RocksDB under `data_dir` (needs the `rocksdb` feature)
    RocksDb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" => Ok(StorageBackend::RocksDb),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Storage backend
    pub storage: StorageBackend,

    /// Currency for accounts opened without one
    pub default_currency: Currency,

    /// Balance given to accounts provisioned on first use
    pub default_opening_balance: Decimal,

    /// Holds older than this are released by the sweeper (seconds)
    pub hold_ttl_secs: u64,

    /// Release markers older than this are forgotten (seconds)
    pub release_ttl_secs: u64,

    /// Sweeper scan interval (seconds)
    pub sweep_interval_secs: u64,

    /// Writer actor configuration
    pub actor: ActorConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Accounts ensured at startup
    pub seed_accounts: Vec<SeedAccount>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "wallet-ledger".to_string(),
            data_dir: PathBuf::from("./data/wallet"),
            storage: StorageBackend::Memory,
            default_currency: Currency::USD,
            default_opening_balance: Decimal::new(100_000, 2), // 1000.00
            hold_ttl_secs: 600,
            release_ttl_secs: 86_400,
            sweep_interval_secs: 30,
            actor: ActorConfig::default(),
            rocksdb: RocksDBConfig::default(),
            seed_accounts: Vec::new(),
        }
    }
}

/// Writer actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox size (backpressure)
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync every write batch
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            sync_writes: true,
        }
    }
}

/// Account ensured at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedAccount {
    /// Account id
    pub account_id: AccountId,

    /// Display label, logged only
    #[serde(default)]
    pub label: Option<String>,

    /// Opening balance
    pub balance: Decimal,

    /// Currency, defaults to the ledger default
    #[serde(default)]
    pub currency: Option<Currency>,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `LEDGER_*` variables resolved by `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::Result<()> {
        if let Some(data_dir) = lookup("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Some(storage) = lookup("LEDGER_STORAGE") {
            self.storage = storage.parse().map_err(crate::Error::Config)?;
        }

        if let Some(currency) = lookup("LEDGER_DEFAULT_CURRENCY") {
            self.default_currency = currency.parse().map_err(crate::Error::Config)?;
        }

        if let Some(ttl) = lookup("LEDGER_HOLD_TTL_SECS") {
            self.hold_ttl_secs = ttl
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_HOLD_TTL_SECS: {}", e)))?;
        }

        if let Some(capacity) = lookup("LEDGER_MAILBOX_CAPACITY") {
            self.actor.mailbox_capacity = capacity
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_MAILBOX_CAPACITY: {}", e)))?;
        }

        Ok(())
    }

    /// Hold time-to-live
    pub fn hold_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.hold_ttl_secs)
    }

    /// How long release markers are kept
    pub fn release_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.release_ttl_secs)
    }
}
