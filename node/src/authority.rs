//! Transaction ledger as the hold authority
//!
//! A hold belongs to a transfer the orchestrator committed exactly when the
//! transaction ledger has a COMPLETED record for it. Those holds wait for
//! their settlement; everything else past the ttl is an orphan.

use async_trait::async_trait;
use protocol::{TransferId, TransferStatus};
use std::sync::Arc;
use transaction_service::TransactionStore;
use wallet_ledger::HoldAuthority;

/// [`HoldAuthority`] answering from the transaction ledger
pub struct StoreAuthority {
    store: Arc<dyn TransactionStore>,
}

impl std::fmt::Debug for StoreAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAuthority").finish_non_exhaustive()
    }
}

impl StoreAuthority {
    /// Answer from `store`
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HoldAuthority for StoreAuthority {
    async fn awaits_settlement(&self, transfer_id: &TransferId) -> wallet_ledger::Result<bool> {
        let record = self
            .store
            .get(transfer_id)
            .map_err(|e| wallet_ledger::Error::Storage(e.to_string()))?;
        Ok(matches!(record, Some(r) if r.status == TransferStatus::Completed))
    }
}
