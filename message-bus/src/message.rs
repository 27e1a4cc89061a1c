//! Message envelope for pub/sub

use crate::types::{MessageType, PartitionKey};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Message type
    pub message_type: MessageType,

    /// Partition key for routing
    pub partition_key: PartitionKey,

    /// Payload (JSON-serialized)
    pub payload: serde_json::Value,

    /// Key the broker deduplicates publishes on; defaults to the message id
    #[serde(default)]
    pub idempotency_key: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Correlation ID (for tracing)
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// Headers (metadata)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Create new message
    pub fn new(
        message_type: MessageType,
        partition_key: PartitionKey,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            message_type,
            partition_key,
            payload,
            idempotency_key: None,
            timestamp: Utc::now(),
            correlation_id: None,
            headers: HashMap::new(),
        }
    }

    /// Create a message from any serializable payload
    pub fn encode<T: Serialize>(
        message_type: MessageType,
        partition_key: PartitionKey,
        payload: &T,
    ) -> crate::Result<Self> {
        let payload = serde_json::to_value(payload)?;
        Ok(Self::new(message_type, partition_key, payload))
    }

    /// Decode the payload
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Set idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Key publishes are deduplicated on
    pub fn dedup_key(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }

    /// Get NATS subject for this message
    pub fn subject(&self) -> String {
        format!(
            "{}.{}",
            self.message_type.subject_prefix(),
            self.partition_key.to_subject_segment()
        )
    }
}
