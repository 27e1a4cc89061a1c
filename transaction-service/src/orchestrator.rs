//! Transfer orchestrator
//!
//! Validates a request, asks the balance oracle once under a deadline and
//! writes the outcome to the transaction ledger. A COMPLETED record lands
//! together with its outbox entry; the relay publishes it later.
//!
//! The orchestrator fails closed: no oracle answer means no record and no
//! event.

use crate::{
    config::{BalancePolicy, Config},
    error::TransferError,
    metrics::Metrics,
    oracle_client::OracleClient,
    store::{OutboxEntry, TransactionStore},
};
use chrono::Utc;
use protocol::{
    AccountId, BalanceCheckRequest, BalanceOracle, ReleaseRequest, ReserveRequest, RpcError,
    TransferId, TransferRecord, TransferRequest, TransferStatus,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result type for orchestrator entry points
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Oracle verdict for one transfer
#[derive(Debug, Clone, Copy)]
struct Admission {
    admitted: bool,
    available: Decimal,
}

/// Transfer orchestrator
pub struct TransferOrchestrator {
    store: Arc<dyn TransactionStore>,
    oracle: OracleClient,
    policy: BalancePolicy,
    metrics: Metrics,
}

impl std::fmt::Debug for TransferOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOrchestrator")
            .field("oracle", &self.oracle)
            .field("policy", &self.policy)
            .finish()
    }
}

impl TransferOrchestrator {
    /// Create orchestrator
    pub fn new(
        store: Arc<dyn TransactionStore>,
        oracle: Arc<dyn BalanceOracle>,
        config: &Config,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            oracle: OracleClient::new(oracle, config.oracle_timeout(), metrics.clone()),
            policy: config.balance_policy,
            metrics,
        }
    }

    /// Move `amount` from sender to receiver.
    ///
    /// Returns the COMPLETED record. An insufficient balance still writes a
    /// FAILED record, whose id is carried by the error.
    pub async fn transfer(&self, request: TransferRequest) -> TransferResult<TransferRecord> {
        let (sender_id, receiver_id, amount) = validate(&request).map_err(|e| {
            self.metrics.record_transfer("rejected");
            debug!(error = %e, "Transfer rejected");
            e
        })?;

        let transfer_id = TransferId::generate();

        let admission = match self.admit(transfer_id, sender_id, amount).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    transfer_id = %transfer_id,
                    sender_id = %sender_id,
                    error = %e,
                    "Balance check unavailable"
                );
                // A timed-out reserve may still have placed a hold
                if self.policy == BalancePolicy::Reserve {
                    self.release_quietly(transfer_id).await;
                }
                self.metrics.record_transfer("unavailable");
                return Err(TransferError::BalanceCheckUnavailable(e.to_string()));
            }
        };

        let status = if admission.admitted {
            TransferStatus::Completed
        } else {
            TransferStatus::Failed
        };
        let record = TransferRecord {
            id: transfer_id,
            sender_id,
            receiver_id,
            amount,
            status,
            created_at: Utc::now(),
        };

        let written = match status {
            TransferStatus::Completed => self
                .store
                .insert_with_outbox(&record, &OutboxEntry::for_record(&record)),
            TransferStatus::Failed => self.store.insert(&record),
        };

        if let Err(e) = written {
            error!(transfer_id = %transfer_id, error = %e, "Failed to write transfer record");
            if admission.admitted && self.policy == BalancePolicy::Reserve {
                self.release_quietly(transfer_id).await;
            }
            self.metrics.record_transfer("storage_error");
            return Err(e.into());
        }

        match status {
            TransferStatus::Completed => {
                self.metrics.record_transfer("completed");
                info!(
                    transfer_id = %transfer_id,
                    sender_id = %sender_id,
                    receiver_id = %receiver_id,
                    amount = %amount,
                    "Transfer completed"
                );
                Ok(record)
            }
            TransferStatus::Failed => {
                self.metrics.record_transfer("failed");
                info!(
                    transfer_id = %transfer_id,
                    sender_id = %sender_id,
                    amount = %amount,
                    available = %admission.available,
                    "Transfer failed: insufficient balance"
                );
                Err(TransferError::InsufficientBalance {
                    transfer_id,
                    available: admission.available,
                })
            }
        }
    }

    /// Every transfer involving `account`, newest first
    pub fn history(&self, account: &AccountId) -> TransferResult<Vec<TransferRecord>> {
        Ok(self.store.history(account)?)
    }

    /// Transfer record by id
    pub fn get(&self, transfer_id: &TransferId) -> TransferResult<Option<TransferRecord>> {
        Ok(self.store.get(transfer_id)?)
    }

    /// Balance policy in force
    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// One oracle round trip under the configured policy
    async fn admit(
        &self,
        transfer_id: TransferId,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Admission, RpcError> {
        match self.policy {
            BalancePolicy::Reserve => {
                let response = self
                    .oracle
                    .reserve(ReserveRequest {
                        transfer_id,
                        account_id,
                        amount,
                    })
                    .await?;
                Ok(Admission {
                    admitted: response.reserved,
                    available: response.available,
                })
            }
            BalancePolicy::CheckOnly => {
                let response = self
                    .oracle
                    .check_sufficient(BalanceCheckRequest { account_id, amount })
                    .await?;
                Ok(Admission {
                    admitted: response.sufficient,
                    available: response.current_balance,
                })
            }
        }
    }

    /// Drop a hold that no record will ever settle
    async fn release_quietly(&self, transfer_id: TransferId) {
        match self.oracle.release(ReleaseRequest { transfer_id }).await {
            Ok(response) => {
                debug!(transfer_id = %transfer_id, released = response.released, "Hold release");
            }
            Err(e) => {
                // the ledger's hold sweeper reclaims it after the TTL
                warn!(transfer_id = %transfer_id, error = %e, "Hold release failed");
            }
        }
    }
}

/// Presence, distinct parties and a positive amount, checked in that order
fn validate(request: &TransferRequest) -> TransferResult<(AccountId, AccountId, Decimal)> {
    let sender_id = request
        .sender_id
        .ok_or_else(|| TransferError::InvalidRequest("missing senderId".to_string()))?;
    let receiver_id = request
        .receiver_id
        .ok_or_else(|| TransferError::InvalidRequest("missing receiverId".to_string()))?;
    let amount = request
        .amount
        .ok_or_else(|| TransferError::InvalidRequest("missing amount".to_string()))?;

    if sender_id == receiver_id {
        return Err(TransferError::InvalidRequest("self-transfer".to_string()));
    }
    if amount <= Decimal::ZERO {
        return Err(TransferError::InvalidRequest("non-positive amount".to_string()));
    }

    Ok((sender_id, receiver_id, amount))
}
