//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use protocol::{AccountId, Currency, TransferId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account balance record, one per account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Owning account
    pub account_id: AccountId,

    /// Ledger balance
    pub balance: Decimal,

    /// Sum of open holds
    pub held: Decimal,

    /// Account currency
    pub currency: Currency,

    /// Opened at
    pub created_at: DateTime<Utc>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// New account with no holds
    pub fn new(account_id: AccountId, balance: Decimal, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance,
            held: Decimal::ZERO,
            currency,
            created_at: now,
            updated_at: now,
        }
    }

    /// Spendable balance: ledger balance minus holds
    pub fn available(&self) -> Decimal {
        self.balance - self.held
    }

    /// Balance below zero
    pub fn is_overdrawn(&self) -> bool {
        self.balance < Decimal::ZERO
    }

    /// Drop `amount` of holds, never going below zero
    pub(crate) fn release_hold(&mut self, amount: Decimal) {
        self.held = (self.held - amount).max(Decimal::ZERO);
    }
}

/// Funds set aside for one admitted transfer until it settles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Transfer the hold belongs to
    pub transfer_id: TransferId,

    /// Account holding the funds
    pub account_id: AccountId,

    /// Amount held
    pub amount: Decimal,

    /// When the hold was placed
    pub placed_at: DateTime<Utc>,
}

/// Proof that a transfer id has been applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementMarker {
    /// Settled transfer
    pub transfer_id: TransferId,

    /// Debited account
    pub sender_id: AccountId,

    /// Credited account
    pub receiver_id: AccountId,

    /// Amount moved
    pub amount: Decimal,

    /// Apply time
    pub applied_at: DateTime<Utc>,
}

/// Release recorded for a transfer id.
///
/// A reserve arriving after its own release is refused, so a reserve that
/// outran the caller's timeout cannot leave a hold behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMarker {
    /// Released transfer
    pub transfer_id: TransferId,

    /// Whether a hold existed when the release arrived
    pub dropped_hold: bool,

    /// Release time
    pub released_at: DateTime<Utc>,
}

/// Result of applying a settlement event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Debit and credit committed
    Applied {
        /// Sender balance after the debit
        sender_balance: Decimal,
        /// Receiver balance after the credit
        receiver_balance: Decimal,
        /// Sender went below zero
        overdraft: bool,
    },

    /// Transfer id already settled; nothing changed
    Duplicate,
}

/// Result of a reserve request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Hold placed
    Reserved {
        /// Spendable balance after the hold
        available: Decimal,
    },

    /// A hold for this transfer already exists
    AlreadyHeld {
        /// Current spendable balance
        available: Decimal,
    },

    /// Transfer already settled; no hold needed
    AlreadySettled,

    /// Transfer was released before the reserve arrived
    Released,

    /// Spendable balance does not cover the amount
    Insufficient {
        /// Current spendable balance
        available: Decimal,
    },

    /// No such account
    UnknownAccount,
}

impl ReserveOutcome {
    /// Whether funds are secured for the transfer
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            ReserveOutcome::Reserved { .. }
                | ReserveOutcome::AlreadyHeld { .. }
                | ReserveOutcome::AlreadySettled
        )
    }

    /// Spendable balance reported with the outcome
    pub fn available(&self) -> Decimal {
        match self {
            ReserveOutcome::Reserved { available }
            | ReserveOutcome::AlreadyHeld { available }
            | ReserveOutcome::Insufficient { available } => *available,
            ReserveOutcome::AlreadySettled
            | ReserveOutcome::Released
            | ReserveOutcome::UnknownAccount => Decimal::ZERO,
        }
    }
}
