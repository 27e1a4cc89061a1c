//! Node configuration
//!
//! One TOML file (path in `RAIL_CONFIG`) with a section per component,
//! then the components' own environment overrides on top.

use anyhow::Context;
use protocol::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use wallet_ledger::SeedAccount;

/// Channel implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process partitioned log
    #[default]
    Memory,
    /// NATS JetStream
    Nats,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(TransportKind::Memory),
            "nats" => Ok(TransportKind::Nats),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

/// Settlement event channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Transport
    pub transport: TransportKind,

    /// Partitions per topic (memory transport)
    pub partitions: u32,

    /// Pause before redelivering a rejected message (memory transport, ms)
    pub redelivery_delay_ms: u64,

    /// Server URL (nats transport)
    pub nats_url: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Memory,
            partitions: 8,
            redelivery_delay_ms: 100,
            nats_url: "nats://localhost:4222".to_string(),
        }
    }
}

impl BusConfig {
    /// Settings for the memory transport
    pub fn in_memory(&self) -> message_bus::InMemoryConfig {
        message_bus::InMemoryConfig {
            partitions: self.partitions,
            redelivery_delay: Duration::from_millis(self.redelivery_delay_ms),
        }
    }

    /// Settings for the JetStream transport
    pub fn nats(&self) -> message_bus::NatsConfig {
        message_bus::NatsConfig {
            url: self.nats_url.clone(),
            ..Default::default()
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Wallet ledger
    pub ledger: wallet_ledger::Config,

    /// Transaction service
    pub transactions: transaction_service::Config,

    /// Settlement consumer
    pub settlement: settlement::ConsumerConfig,

    /// Event channel
    pub bus: BusConfig,

    /// Queued oracle calls before callers wait
    pub oracle_channel_capacity: usize,

    /// Reconciliation scan interval (seconds)
    pub reconcile_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ledger: wallet_ledger::Config::default(),
            transactions: transaction_service::Config::default(),
            settlement: settlement::ConsumerConfig::default(),
            bus: BusConfig::default(),
            oracle_channel_capacity: 256,
            reconcile_interval_secs: 60,
        }
    }
}

impl NodeConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// `RAIL_CONFIG` file (or defaults), then environment overrides
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = match std::env::var("RAIL_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply every component's overrides resolved by `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        self.ledger.apply_overrides(&lookup)?;
        self.transactions.apply_overrides(&lookup)?;
        self.settlement.apply_overrides(&lookup)?;

        if let Some(transport) = lookup("RAIL_TRANSPORT") {
            self.bus.transport = transport.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(url) = lookup("NATS_URL") {
            self.bus.nats_url = url;
        }
        Ok(())
    }

    /// Reconciliation interval
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

/// Two demo accounts under fresh ids: alice 1000.00 and bob 250.00
pub fn demo_seed_accounts() -> Vec<SeedAccount> {
    [("alice", Decimal::new(100_000, 2)), ("bob", Decimal::new(25_000, 2))]
        .into_iter()
        .map(|(label, balance)| SeedAccount {
            account_id: AccountId::random(),
            label: Some(label.to_string()),
            balance,
            currency: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_overrides_reach_every_component() {
        let vars: HashMap<&str, &str> = [
            ("LEDGER_HOLD_TTL_SECS", "9"),
            ("TRANSFER_ORACLE_TIMEOUT_MS", "100"),
            ("SETTLEMENT_CONSUMER_GROUP", "ops"),
            ("RAIL_TRANSPORT", "nats"),
            ("NATS_URL", "nats://bus:4222"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.ledger.hold_ttl_secs, 9);
        assert_eq!(config.transactions.oracle_timeout_ms, 100);
        assert_eq!(config.settlement.consumer_group, "ops");
        assert_eq!(config.bus.transport, TransportKind::Nats);
        assert_eq!(config.bus.nats().url, "nats://bus:4222");
    }

    #[test]
    fn test_from_file_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
reconcile_interval_secs = 5

[transactions]
balance_policy = "check-only"

[settlement.retry]
max_retries = 2

[bus]
partitions = 4
"#
        )
        .unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.reconcile_interval(), Duration::from_secs(5));
        assert_eq!(
            config.transactions.balance_policy,
            transaction_service::BalancePolicy::CheckOnly
        );
        assert_eq!(config.settlement.retry.max_retries, 2);
        assert_eq!(config.settlement.consumer_group, "wallet-group");
        assert_eq!(config.bus.in_memory().partitions, 4);
    }

    #[test]
    fn test_demo_seeds() {
        let seeds = demo_seed_accounts();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].label.as_deref(), Some("alice"));
        assert_eq!(seeds[1].balance, Decimal::new(25_000, 2));
        assert_ne!(seeds[0].account_id, seeds[1].account_id);
    }
}
