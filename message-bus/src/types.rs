//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Transfer accepted by the orchestrator, to be applied by the wallet side
    SettlementEvent,
    /// Dead-lettered message with failure metadata
    DeadLetter,
}

impl MessageType {
    /// Get NATS subject prefix for this message type
    pub fn subject_prefix(&self) -> &'static str {
        match self {
            MessageType::SettlementEvent => "rail.settlement.transfer",
            MessageType::DeadLetter => "rail.dlq",
        }
    }

    /// Get JetStream stream name for this message type
    pub fn stream_name(&self) -> &'static str {
        match self {
            MessageType::SettlementEvent => "SETTLEMENT_EVENTS",
            MessageType::DeadLetter => "DEAD_LETTERS",
        }
    }

    /// Short label used in metrics and DLQ subjects
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::SettlementEvent => "settlement_event",
            MessageType::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition key for routing messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKey {
    /// Partition by account id; every message for one account stays in order
    Account(String),
    /// No ordering requirement, goes to partition 0
    Broadcast,
}

impl PartitionKey {
    /// Key for an account
    pub fn account(id: impl ToString) -> Self {
        PartitionKey::Account(id.to_string())
    }

    /// Get partitioning string for NATS subject
    pub fn to_subject_segment(&self) -> String {
        match self {
            PartitionKey::Account(id) => format!("account.{}", sanitize_subject(id)),
            PartitionKey::Broadcast => "broadcast".to_string(),
        }
    }

    /// Compute partition number for load balancing
    pub fn partition_number(&self, num_partitions: u32) -> u32 {
        let hash = match self {
            PartitionKey::Account(id) => blake3::hash(id.as_bytes()),
            PartitionKey::Broadcast => return 0,
        };

        let hash_bytes = hash.as_bytes();
        let hash_u32 =
            u32::from_le_bytes([hash_bytes[0], hash_bytes[1], hash_bytes[2], hash_bytes[3]]);
        hash_u32 % num_partitions.max(1)
    }
}

/// Sanitize string for use in NATS subject
fn sanitize_subject(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
