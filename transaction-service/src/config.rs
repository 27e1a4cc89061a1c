//! Configuration for the transaction service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the orchestrator asks the oracle about funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancePolicy {
    /// Atomic check-and-hold on the ledger; concurrent transfers cannot overdraw
    #[default]
    Reserve,
    /// Pure read; overdraft is left to reconciliation
    CheckOnly,
}

impl FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reserve" => Ok(BalancePolicy::Reserve),
            "check-only" | "check_only" => Ok(BalancePolicy::CheckOnly),
            other => Err(format!("unknown balance policy: {}", other)),
        }
    }
}

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

/// Transaction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Storage backend
    pub storage: StorageBackend,

    /// Upper bound on one oracle round trip (milliseconds)
    pub oracle_timeout_ms: u64,

    /// Balance policy
    pub balance_policy: BalancePolicy,

    /// fsync every write batch (RocksDB)
    pub sync_writes: bool,

    /// Outbox relay configuration
    pub outbox: OutboxConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "transaction-service".to_string(),
            data_dir: PathBuf::from("./data/transactions"),
            storage: StorageBackend::Memory,
            oracle_timeout_ms: 3000,
            balance_policy: BalancePolicy::Reserve,
            sync_writes: true,
            outbox: OutboxConfig::default(),
        }
    }
}

/// Outbox relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Entries published per tick
    pub batch_size: usize,

    /// Pause between ticks (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 200,
        }
    }
}

impl OutboxConfig {
    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
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

    /// Override fields from `TRANSFER_*` variables resolved by `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::Result<()> {
        if let Some(timeout) = lookup("TRANSFER_ORACLE_TIMEOUT_MS") {
            self.oracle_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("TRANSFER_ORACLE_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Some(policy) = lookup("TRANSFER_BALANCE_POLICY") {
            self.balance_policy = policy.parse().map_err(crate::Error::Config)?;
        }

        if let Some(data_dir) = lookup("TRANSFER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Some(storage) = lookup("TRANSFER_STORAGE") {
            self.storage = storage.parse().map_err(crate::Error::Config)?;
        }

        Ok(())
    }

    /// Oracle deadline
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.oracle_timeout(), Duration::from_secs(3));
        assert_eq!(config.balance_policy, BalancePolicy::Reserve);
        assert_eq!(config.outbox.batch_size, 100);
        assert_eq!(config.outbox.poll_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TRANSFER_ORACLE_TIMEOUT_MS", "250"),
            ("TRANSFER_BALANCE_POLICY", "check-only"),
            ("TRANSFER_DATA_DIR", "/var/lib/rail"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.oracle_timeout_ms, 250);
        assert_eq!(config.balance_policy, BalancePolicy::CheckOnly);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/rail"));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "TRANSFER_BALANCE_POLICY").then(|| "yolo".to_string()))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
oracle_timeout_ms = 500
balance_policy = "check-only"

[outbox]
batch_size = 10
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.oracle_timeout_ms, 500);
        assert_eq!(config.balance_policy, BalancePolicy::CheckOnly);
        assert_eq!(config.outbox.batch_size, 10);
        assert_eq!(config.outbox.poll_interval_ms, 200);
    }
}
