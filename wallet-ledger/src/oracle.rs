//! Balance oracle served from the ledger
//!
//! `check_sufficient` and `get_balance` read storage directly and never queue
//! behind the writer. `reserve` and `release` go through the writer so a
//! hold is placed against the balance the next debit will see.

use crate::{Error, Ledger, ReserveOutcome};
use async_trait::async_trait;
use protocol::{
    BalanceCheckRequest, BalanceCheckResponse, BalanceOracle, BalanceRequest, BalanceResponse,
    ReleaseRequest, ReleaseResponse, ReserveRequest, ReserveResponse, RpcError, RpcResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// [`BalanceOracle`] backed by a [`Ledger`]
#[derive(Debug, Clone)]
pub struct LedgerOracle {
    ledger: Arc<Ledger>,
}

impl LedgerOracle {
    /// Serve balance queries from `ledger`
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

fn server_error(err: Error) -> RpcError {
    RpcError::Server(err.to_string())
}

#[async_trait]
impl BalanceOracle for LedgerOracle {
    async fn check_sufficient(
        &self,
        request: BalanceCheckRequest,
    ) -> RpcResult<BalanceCheckResponse> {
        let response = match self.ledger.account(&request.account_id).map_err(server_error)? {
            Some(account) => BalanceCheckResponse {
                sufficient: account.available() >= request.amount,
                current_balance: account.balance,
            },
            None => BalanceCheckResponse {
                sufficient: false,
                current_balance: Decimal::ZERO,
            },
        };

        tracing::debug!(
            account_id = %request.account_id,
            amount = %request.amount,
            sufficient = response.sufficient,
            "Balance check"
        );
        Ok(response)
    }

    async fn get_balance(&self, request: BalanceRequest) -> RpcResult<BalanceResponse> {
        let response = match self.ledger.account(&request.account_id).map_err(server_error)? {
            Some(account) => BalanceResponse {
                account_id: account.account_id,
                balance: account.balance,
                currency: account.currency,
            },
            None => BalanceResponse {
                account_id: request.account_id,
                balance: Decimal::ZERO,
                currency: self.ledger.config().default_currency,
            },
        };
        Ok(response)
    }

    async fn reserve(&self, request: ReserveRequest) -> RpcResult<ReserveResponse> {
        let outcome = self
            .ledger
            .reserve(request.transfer_id, request.account_id, request.amount)
            .await
            .map_err(server_error)?;

        if let ReserveOutcome::UnknownAccount = outcome {
            tracing::debug!(account_id = %request.account_id, "Reserve on unknown account");
        }

        Ok(ReserveResponse {
            reserved: outcome.is_reserved(),
            available: outcome.available(),
        })
    }

    async fn release(&self, request: ReleaseRequest) -> RpcResult<ReleaseResponse> {
        let released = self
            .ledger
            .release(request.transfer_id)
            .await
            .map_err(server_error)?;
        Ok(ReleaseResponse { released })
    }
}
