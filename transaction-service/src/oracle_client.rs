//! Balance oracle client with a bounded deadline
//!
//! Wraps any [`BalanceOracle`] so that every call either answers within
//! `timeout` or fails with [`RpcError::Timeout`]. A late answer is dropped;
//! for a reserve that means the hold may exist, which the caller has to
//! release.

use crate::metrics::Metrics;
use protocol::{
    BalanceCheckRequest, BalanceCheckResponse, BalanceOracle, BalanceRequest, BalanceResponse,
    ReleaseRequest, ReleaseResponse, ReserveRequest, ReserveResponse, RpcError, RpcResult,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline-bounded oracle client
#[derive(Clone)]
pub struct OracleClient {
    inner: Arc<dyn BalanceOracle>,
    timeout: Duration,
    metrics: Metrics,
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OracleClient {
    /// Wrap `inner` with a per-call deadline
    pub fn new(inner: Arc<dyn BalanceOracle>, timeout: Duration, metrics: Metrics) -> Self {
        Self {
            inner,
            timeout,
            metrics,
        }
    }

    /// Per-call deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, call: impl Future<Output = RpcResult<T>>) -> RpcResult<T> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(self.timeout.as_millis() as u64)),
        };
        self.metrics
            .oracle_duration
            .observe(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            let reason = match e {
                RpcError::Timeout(_) => "timeout",
                RpcError::Transport(_) => "transport",
                RpcError::Server(_) => "server",
            };
            self.metrics.record_oracle_failure(reason);
        }
        result
    }

    /// `CheckSufficient` within the deadline
    pub async fn check_sufficient(
        &self,
        request: BalanceCheckRequest,
    ) -> RpcResult<BalanceCheckResponse> {
        self.bounded(self.inner.check_sufficient(request)).await
    }

    /// `GetBalance` within the deadline
    pub async fn get_balance(&self, request: BalanceRequest) -> RpcResult<BalanceResponse> {
        self.bounded(self.inner.get_balance(request)).await
    }

    /// `Reserve` within the deadline
    pub async fn reserve(&self, request: ReserveRequest) -> RpcResult<ReserveResponse> {
        self.bounded(self.inner.reserve(request)).await
    }

    /// `Release` within the deadline
    pub async fn release(&self, request: ReleaseRequest) -> RpcResult<ReleaseResponse> {
        self.bounded(self.inner.release(request)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use protocol::{AccountId, Currency, TransferId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Scriptable oracle: fixed balance, optional delay, optional failure.
    /// Keeps holds so reserve/release behave like the ledger's.
    pub(crate) struct ScriptedOracle {
        pub balance: Decimal,
        pub delay: Option<Duration>,
        pub fail: Option<RpcError>,
        pub holds: Mutex<Vec<(TransferId, Decimal)>>,
        pub released: Mutex<Vec<TransferId>>,
    }

    impl ScriptedOracle {
        pub(crate) fn with_balance(balance: Decimal) -> Self {
            Self {
                balance,
                delay: None,
                fail: None,
                holds: Mutex::new(Vec::new()),
                released: Mutex::new(Vec::new()),
            }
        }

        fn available(&self) -> Decimal {
            self.balance - self.holds.lock().iter().map(|(_, a)| *a).sum::<Decimal>()
        }

        async fn prelude(&self) -> RpcResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl BalanceOracle for ScriptedOracle {
        async fn check_sufficient(
            &self,
            request: BalanceCheckRequest,
        ) -> RpcResult<BalanceCheckResponse> {
            self.prelude().await?;
            Ok(BalanceCheckResponse {
                sufficient: self.available() >= request.amount,
                current_balance: self.balance,
            })
        }

        async fn get_balance(&self, request: BalanceRequest) -> RpcResult<BalanceResponse> {
            self.prelude().await?;
            Ok(BalanceResponse {
                account_id: request.account_id,
                balance: self.balance,
                currency: Currency::USD,
            })
        }

        async fn reserve(&self, request: ReserveRequest) -> RpcResult<ReserveResponse> {
            self.prelude().await?;
            let available = self.available();
            if available >= request.amount {
                self.holds.lock().push((request.transfer_id, request.amount));
                Ok(ReserveResponse {
                    reserved: true,
                    available: available - request.amount,
                })
            } else {
                Ok(ReserveResponse {
                    reserved: false,
                    available,
                })
            }
        }

        async fn release(&self, request: ReleaseRequest) -> RpcResult<ReleaseResponse> {
            // release ignores the delay and failure script
            self.released.lock().push(request.transfer_id);
            let mut holds = self.holds.lock();
            let before = holds.len();
            holds.retain(|(id, _)| *id != request.transfer_id);
            Ok(ReleaseResponse {
                released: holds.len() < before,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_rpc_timeout() {
        let oracle = ScriptedOracle {
            delay: Some(Duration::from_secs(10)),
            ..ScriptedOracle::with_balance(dec!(100))
        };
        let metrics = Metrics::new().unwrap();
        let client = OracleClient::new(Arc::new(oracle), Duration::from_millis(3000), metrics.clone());

        let err = client
            .get_balance(BalanceRequest {
                account_id: AccountId::random(),
            })
            .await
            .unwrap_err();

        assert_eq!(err, RpcError::Timeout(3000));
        assert_eq!(
            metrics.oracle_failures.with_label_values(&["timeout"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_answer_within_deadline_passes_through() {
        let client = OracleClient::new(
            Arc::new(ScriptedOracle::with_balance(dec!(100))),
            Duration::from_secs(3),
            Metrics::new().unwrap(),
        );

        let response = client
            .check_sufficient(BalanceCheckRequest {
                account_id: AccountId::random(),
                amount: dec!(50),
            })
            .await
            .unwrap();

        assert!(response.sufficient);
        assert_eq!(response.current_balance, dec!(100));
    }

    #[tokio::test]
    async fn test_transport_failure_counted() {
        let oracle = ScriptedOracle {
            fail: Some(RpcError::Transport("connection refused".into())),
            ..ScriptedOracle::with_balance(dec!(100))
        };
        let metrics = Metrics::new().unwrap();
        let client = OracleClient::new(Arc::new(oracle), Duration::from_secs(3), metrics.clone());

        assert!(client
            .reserve(ReserveRequest {
                transfer_id: TransferId::generate(),
                account_id: AccountId::random(),
                amount: dec!(1),
            })
            .await
            .is_err());
        assert_eq!(
            metrics.oracle_failures.with_label_values(&["transport"]).get(),
            1
        );
    }
}
