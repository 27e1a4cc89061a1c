//! Dead Letter Queue router
//!
//! Routes failed messages to DLQ with:
//! - Failure reason tracking
//! - Retry attempt counting
//! - Automatic expiration
//! - Manual reprocessing API
//!
//! Entries are published on the `rail.dlq` subject so any operator tooling
//! subscribed there sees them, and kept in an index for listing and replay.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    metrics::DLQ_ROUTED_TOTAL, publisher::Publisher, Error, Message, MessageType, PartitionKey,
    Result,
};

/// DLQ entry with failure metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Entry id
    pub id: String,
    /// Message as it was delivered
    pub original_message: Message,
    /// Why handling gave up
    pub failure_reason: String,
    /// Attempts made before giving up
    pub retry_count: u32,
    /// First time this message was dead-lettered
    pub first_failure_at: DateTime<Utc>,
    /// Most recent time it was dead-lettered
    pub last_failure_at: DateTime<Utc>,
    /// Entry is purged after this
    pub expires_at: DateTime<Utc>,
    /// Whether a replay can be expected to succeed
    pub reprocessable: bool,
}

/// DLQ statistics
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DlqStats {
    /// Entries in the index
    pub total_entries: usize,
    /// Entries that can be replayed
    pub reprocessable: usize,
    /// Entries past their expiry
    pub expired: usize,
    /// Entry count per reason category
    pub by_reason: HashMap<String, usize>,
}

/// DLQ Router
pub struct DlqRouter {
    publisher: Publisher,
    entries: RwLock<BTreeMap<String, DlqEntry>>,
    max_retention_days: i64,
}

impl std::fmt::Debug for DlqRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlqRouter")
            .field("entries", &self.entries.read().len())
            .field("max_retention_days", &self.max_retention_days)
            .finish()
    }
}

impl DlqRouter {
    /// Create new DLQ router
    pub fn new(publisher: Publisher) -> Self {
        Self {
            publisher,
            entries: RwLock::new(BTreeMap::new()),
            max_retention_days: 30,
        }
    }

    /// Keep entries for `days`
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.max_retention_days = days;
        self
    }

    /// Route message to DLQ, deciding reprocessability from the reason
    pub async fn route_to_dlq(
        &self,
        message: Message,
        failure_reason: String,
        retry_count: u32,
    ) -> Result<String> {
        let reprocessable = Self::is_reprocessable(&failure_reason);
        self.route(message, failure_reason, retry_count, reprocessable)
            .await
    }

    /// Route message to DLQ with an explicit reprocessable flag
    pub async fn route(
        &self,
        message: Message,
        failure_reason: String,
        retry_count: u32,
        reprocessable: bool,
    ) -> Result<String> {
        let now = Utc::now();
        let existing = self
            .entries
            .read()
            .values()
            .find(|entry| entry.original_message.id == message.id)
            .cloned();

        let entry = match existing {
            Some(previous) => DlqEntry {
                failure_reason: failure_reason.clone(),
                retry_count: previous.retry_count + retry_count,
                last_failure_at: now,
                expires_at: now + chrono::Duration::days(self.max_retention_days),
                reprocessable,
                ..previous
            },
            None => DlqEntry {
                id: Uuid::now_v7().to_string(),
                original_message: message.clone(),
                failure_reason: failure_reason.clone(),
                retry_count,
                first_failure_at: now,
                last_failure_at: now,
                expires_at: now + chrono::Duration::days(self.max_retention_days),
                reprocessable,
            },
        };

        info!(
            message_id = %message.id,
            reason = %failure_reason,
            retry_count,
            "Routing message to DLQ"
        );

        let envelope = Message::encode(MessageType::DeadLetter, PartitionKey::Broadcast, &entry)?
            .with_idempotency_key(format!(
                "{}-{}",
                entry.id,
                entry.last_failure_at.timestamp_millis()
            ))
            .with_header(
                "original-subject".to_string(),
                entry.original_message.subject(),
            );
        self.publisher.publish(&envelope).await?;

        DLQ_ROUTED_TOTAL
            .with_label_values(&[
                message.message_type.as_str(),
                if reprocessable { "true" } else { "false" },
            ])
            .inc();

        warn!(
            message_id = %message.id,
            entry_id = %entry.id,
            reason = %failure_reason,
            retry_count = entry.retry_count,
            reprocessable,
            "Message moved to DLQ"
        );

        let entry_id = entry.id.clone();
        self.entries.write().insert(entry_id.clone(), entry);
        Ok(entry_id)
    }

    /// Check if failure is reprocessable
    pub fn is_reprocessable(reason: &str) -> bool {
        // Transient errors are reprocessable
        let transient_errors = [
            "timeout",
            "timed out",
            "connection",
            "unavailable",
            "storage",
            "mailbox closed",
            "temporary",
        ];

        let reason = reason.to_lowercase();
        transient_errors.iter().any(|err| reason.contains(err))
    }

    /// Reprocess message from DLQ: republish the original and drop the entry
    pub async fn reprocess(&self, entry_id: &str) -> Result<Message> {
        info!(entry_id, "Reprocessing DLQ entry");

        let entry = self
            .get_entry(entry_id)
            .ok_or_else(|| Error::NotFound(format!("DLQ entry {} not found", entry_id)))?;

        if !entry.reprocessable {
            return Err(Error::NotReprocessable(format!(
                "Entry {} is not reprocessable: {}",
                entry_id, entry.failure_reason
            )));
        }

        // fresh id so the broker's duplicate window does not swallow the replay
        let mut replay = entry.original_message.clone();
        replay.id = Uuid::now_v7();
        replay.idempotency_key = Some(format!(
            "{}-replay-{}",
            entry.original_message.dedup_key(),
            entry.id
        ));

        self.publisher.publish(&replay).await?;
        self.entries.write().remove(entry_id);

        info!(entry_id, message_id = %replay.id, "DLQ entry reprocessed");
        Ok(replay)
    }

    /// Get DLQ entry by ID
    pub fn get_entry(&self, entry_id: &str) -> Option<DlqEntry> {
        self.entries.read().get(entry_id).cloned()
    }

    /// List DLQ entries, oldest first
    pub fn list_entries(&self, reprocessable_only: bool, limit: usize) -> Vec<DlqEntry> {
        self.entries
            .read()
            .values()
            .filter(|entry| !reprocessable_only || entry.reprocessable)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Get DLQ statistics
    pub fn get_stats(&self) -> DlqStats {
        let now = Utc::now();
        let entries = self.entries.read();
        let mut stats = DlqStats {
            total_entries: entries.len(),
            ..DlqStats::default()
        };

        for entry in entries.values() {
            if entry.reprocessable {
                stats.reprocessable += 1;
            }
            if entry.expires_at <= now {
                stats.expired += 1;
            }
            let category = entry
                .failure_reason
                .split(':')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            *stats.by_reason.entry(category).or_insert(0) += 1;
        }

        stats
    }
}
