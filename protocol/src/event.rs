//! Settlement event payload

use crate::types::{AccountId, TransferId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Published once per COMPLETED transfer; tells the wallet side to debit the
/// sender and credit the receiver.
///
/// `transfer_id` is the dedup key: the channel delivers at least once and the
/// consumer applies each transfer id at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementEvent {
    /// Originating transfer record
    pub transfer_id: TransferId,
    /// Account to debit
    pub sender_id: AccountId,
    /// Account to credit
    pub receiver_id: AccountId,
    /// Amount moved
    pub amount: Decimal,
    /// When the transfer was recorded
    pub occurred_at: DateTime<Utc>,
}

impl SettlementEvent {
    /// Build an event
    pub fn new(
        transfer_id: TransferId,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transfer_id,
            sender_id,
            receiver_id,
            amount,
            occurred_at,
        }
    }

    /// Channel partition key: every event from one sender lands on one partition
    pub fn partition_account(&self) -> AccountId {
        self.sender_id
    }
}
