//! Transfer rail wire contracts
//!
//! Types exchanged between the wallet side (ledger store, balance oracle,
//! settlement consumer) and the transaction side (transfer orchestrator,
//! transaction ledger).
//!
//! # Surfaces
//!
//! - **Balance oracle RPC**: [`BalanceOracle`] plus request/response messages
//! - **Settlement event**: [`SettlementEvent`], published once per completed transfer
//! - **Transfer DTOs**: [`TransferRequest`], [`TransferRecord`], [`TransferStatus`]
//!
//! Money is always [`rust_decimal::Decimal`]. JSON field names are camelCase.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod channel;
pub mod error;
pub mod event;
pub mod rpc;
pub mod transfer;
pub mod types;

pub use channel::{oracle_channel, serve_oracle, OracleCall, OracleReceiver, OracleSender};
pub use error::{RpcError, RpcResult};
pub use event::SettlementEvent;
pub use rpc::{
    BalanceCheckRequest, BalanceCheckResponse, BalanceOracle, BalanceRequest, BalanceResponse,
    ReleaseRequest, ReleaseResponse, ReserveRequest, ReserveResponse,
};
pub use transfer::{TransferRecord, TransferRequest, TransferStatus};
pub use types::{AccountId, Currency, TransferId};
