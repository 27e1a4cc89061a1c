//! Transfer request and record

use crate::event::SettlementEvent;
use crate::types::{AccountId, TransferId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer outcome, fixed when the record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Balance check passed; settlement event queued
    Completed,
    /// Rejected for insufficient balance; kept for audit
    Failed,
}

impl TransferStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound transfer request.
///
/// Fields are optional because the request arrives from an outer layer that
/// may omit them; presence is the orchestrator's first check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferRequest {
    /// Paying account
    pub sender_id: Option<AccountId>,
    /// Receiving account
    pub receiver_id: Option<AccountId>,
    /// Amount to move
    pub amount: Option<Decimal>,
}

impl TransferRequest {
    /// Request with every field present
    pub fn new(sender_id: AccountId, receiver_id: AccountId, amount: Decimal) -> Self {
        Self {
            sender_id: Some(sender_id),
            receiver_id: Some(receiver_id),
            amount: Some(amount),
        }
    }
}

/// Durable transfer record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Record id, also the settlement dedup key
    pub id: TransferId,
    /// Paying account
    pub sender_id: AccountId,
    /// Receiving account
    pub receiver_id: AccountId,
    /// Amount
    pub amount: Decimal,
    /// Outcome
    pub status: TransferStatus,
    /// Persist time
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    /// True when `account` is sender or receiver
    pub fn involves(&self, account: &AccountId) -> bool {
        self.sender_id == *account || self.receiver_id == *account
    }

    /// Settlement event announcing this transfer
    pub fn settlement_event(&self) -> SettlementEvent {
        SettlementEvent::new(
            self.id,
            self.sender_id,
            self.receiver_id,
            self.amount,
            self.created_at,
        )
    }
}
