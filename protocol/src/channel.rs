//! In-process oracle transport
//!
//! Request/response over a bounded mpsc queue with a oneshot reply per call.
//! The client half implements [`BalanceOracle`], so the orchestrator cannot
//! tell it apart from a network client. A dropped server surfaces as
//! [`RpcError::Transport`].

use crate::error::{RpcError, RpcResult};
use crate::rpc::{
    BalanceCheckRequest, BalanceCheckResponse, BalanceOracle, BalanceRequest, BalanceResponse,
    ReleaseRequest, ReleaseResponse, ReserveRequest, ReserveResponse,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// One call in flight
#[derive(Debug)]
pub enum OracleCall {
    /// `CheckSufficient`
    CheckSufficient {
        /// Request body
        request: BalanceCheckRequest,
        /// Reply slot
        reply: oneshot::Sender<RpcResult<BalanceCheckResponse>>,
    },

    /// `GetBalance`
    GetBalance {
        /// Request body
        request: BalanceRequest,
        /// Reply slot
        reply: oneshot::Sender<RpcResult<BalanceResponse>>,
    },

    /// `Reserve`
    Reserve {
        /// Request body
        request: ReserveRequest,
        /// Reply slot
        reply: oneshot::Sender<RpcResult<ReserveResponse>>,
    },

    /// `Release`
    Release {
        /// Request body
        request: ReleaseRequest,
        /// Reply slot
        reply: oneshot::Sender<RpcResult<ReleaseResponse>>,
    },
}

impl OracleCall {
    /// Answer the call from `oracle`. A caller that gave up is ignored.
    pub async fn dispatch(self, oracle: &dyn BalanceOracle) {
        match self {
            OracleCall::CheckSufficient { request, reply } => {
                let _ = reply.send(oracle.check_sufficient(request).await);
            }
            OracleCall::GetBalance { request, reply } => {
                let _ = reply.send(oracle.get_balance(request).await);
            }
            OracleCall::Reserve { request, reply } => {
                let _ = reply.send(oracle.reserve(request).await);
            }
            OracleCall::Release { request, reply } => {
                let _ = reply.send(oracle.release(request).await);
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            OracleCall::CheckSufficient { .. } => "check_sufficient",
            OracleCall::GetBalance { .. } => "get_balance",
            OracleCall::Reserve { .. } => "reserve",
            OracleCall::Release { .. } => "release",
        }
    }
}

/// Client half
#[derive(Clone, Debug)]
pub struct OracleSender {
    tx: mpsc::Sender<OracleCall>,
}

impl OracleSender {
    async fn call<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<RpcResult<R>>) -> OracleCall,
    ) -> RpcResult<R> {
        let (reply, response) = oneshot::channel();

        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RpcError::Transport("Oracle channel closed".to_string()))?;

        response
            .await
            .map_err(|_| RpcError::Transport("Oracle reply channel closed".to_string()))?
    }
}

#[async_trait]
impl BalanceOracle for OracleSender {
    async fn check_sufficient(
        &self,
        request: BalanceCheckRequest,
    ) -> RpcResult<BalanceCheckResponse> {
        self.call(|reply| OracleCall::CheckSufficient { request, reply })
            .await
    }

    async fn get_balance(&self, request: BalanceRequest) -> RpcResult<BalanceResponse> {
        self.call(|reply| OracleCall::GetBalance { request, reply }).await
    }

    async fn reserve(&self, request: ReserveRequest) -> RpcResult<ReserveResponse> {
        self.call(|reply| OracleCall::Reserve { request, reply }).await
    }

    async fn release(&self, request: ReleaseRequest) -> RpcResult<ReleaseResponse> {
        self.call(|reply| OracleCall::Release { request, reply }).await
    }
}

/// Server half
#[derive(Debug)]
pub struct OracleReceiver {
    rx: mpsc::Receiver<OracleCall>,
}

impl OracleReceiver {
    /// Next call, `None` once every client is gone
    pub async fn recv(&mut self) -> Option<OracleCall> {
        self.rx.recv().await
    }
}

/// Create a client/server pair with `buffer` calls of queueing
pub fn oracle_channel(buffer: usize) -> (OracleSender, OracleReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (OracleSender { tx }, OracleReceiver { rx })
}

/// Serve calls from `receiver` with `oracle` until every client is dropped.
///
/// Each call runs on its own task so a slow answer does not queue the others.
pub fn serve_oracle(mut receiver: OracleReceiver, oracle: Arc<dyn BalanceOracle>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(call) = receiver.recv().await {
            debug!(call = call.name(), "Oracle call received");
            let oracle = oracle.clone();
            tokio::spawn(async move {
                call.dispatch(oracle.as_ref()).await;
            });
        }
        debug!("Oracle server stopped: all clients dropped");
    })
}
