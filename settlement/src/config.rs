//! Configuration for the settlement consumer

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Settlement consumer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer group; every group receives every settlement event once
    pub consumer_group: String,

    /// Backoff for retryable apply failures
    pub retry: RetryConfig,

    /// Days a dead-lettered event is kept
    pub dlq_retention_days: i64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_group: "wallet-group".to_string(),
            retry: RetryConfig::default(),
            dlq_retention_days: 30,
        }
    }
}

impl ConsumerConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConsumerConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = ConsumerConfig::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `SETTLEMENT_*` variables resolved by `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> crate::Result<()> {
        if let Some(group) = lookup("SETTLEMENT_CONSUMER_GROUP") {
            if group.trim().is_empty() {
                return Err(crate::Error::Config(
                    "SETTLEMENT_CONSUMER_GROUP is empty".to_string(),
                ));
            }
            self.consumer_group = group;
        }

        if let Some(retries) = lookup("SETTLEMENT_MAX_RETRIES") {
            self.retry.max_retries = retries
                .parse()
                .map_err(|e| crate::Error::Config(format!("SETTLEMENT_MAX_RETRIES: {}", e)))?;
        }

        Ok(())
    }
}
