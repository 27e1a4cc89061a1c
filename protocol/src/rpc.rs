//! Balance oracle RPC contract
//!
//! The transaction side never reads the ledger store directly; it asks the
//! wallet side through [`BalanceOracle`]. Implementations exist for the
//! in-process channel client ([`crate::OracleSender`]) and for the ledger
//! itself on the server side.

use crate::error::RpcResult;
use crate::types::{AccountId, Currency, TransferId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `CheckSufficient` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheckRequest {
    /// Account to check
    pub account_id: AccountId,
    /// Amount the caller intends to move
    pub amount: Decimal,
}

/// `CheckSufficient` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheckResponse {
    /// Whether the spendable balance covers the amount
    pub sufficient: bool,
    /// Ledger balance at the time of the read
    pub current_balance: Decimal,
}

/// `GetBalance` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRequest {
    /// Account to read
    pub account_id: AccountId,
}

/// `GetBalance` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    /// Account read
    pub account_id: AccountId,
    /// Ledger balance
    pub balance: Decimal,
    /// Account currency
    pub currency: Currency,
}

/// `Reserve` request: atomic check-and-hold for one transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    /// Transfer the hold belongs to
    pub transfer_id: TransferId,
    /// Account to hold funds on
    pub account_id: AccountId,
    /// Amount to hold
    pub amount: Decimal,
}

/// `Reserve` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    /// Whether the hold is in place
    pub reserved: bool,
    /// Spendable balance after the call
    pub available: Decimal,
}

/// `Release` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    /// Transfer whose hold is dropped
    pub transfer_id: TransferId,
}

/// `Release` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    /// Whether a hold existed and was removed
    pub released: bool,
}

/// Synchronous balance queries served by the wallet side.
///
/// `check_sufficient` and `get_balance` are pure reads; no lock survives the
/// call. `reserve` and `release` mutate holds only, never the balance.
/// An unknown account is not an error: it has nothing to spend.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    /// Does the account currently cover `amount`
    async fn check_sufficient(&self, request: BalanceCheckRequest)
        -> RpcResult<BalanceCheckResponse>;

    /// Current balance and currency
    async fn get_balance(&self, request: BalanceRequest) -> RpcResult<BalanceResponse>;

    /// Place a hold for a transfer if the spendable balance covers it
    async fn reserve(&self, request: ReserveRequest) -> RpcResult<ReserveResponse>;

    /// Drop the hold placed for a transfer
    async fn release(&self, request: ReleaseRequest) -> RpcResult<ReleaseResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_check_wire_shape() {
        let response = BalanceCheckResponse {
            sufficient: true,
            current_balance: dec!(100.00),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["sufficient"], true);
        assert_eq!(json["currentBalance"], "100.00");
    }

    #[test]
    fn test_balance_response_wire_shape() {
        let account_id = AccountId::random();
        let response = BalanceResponse {
            account_id,
            balance: dec!(250.00),
            currency: Currency::USD,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accountId"], account_id.to_string());
        assert_eq!(json["currency"], "USD");

        let back: BalanceResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
