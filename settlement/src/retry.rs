//! Retry strategy: exponential backoff with jitter for settlement applies

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for any delay
    pub max_delay_ms: u64,
    /// Growth factor per retry
    pub backoff_multiplier: f64,
    /// Relative jitter, 0.1 = ±10%
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

/// Result of a retried operation together with how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result
    pub result: Result<T>,
    /// Attempts made, at least 1
    pub attempts: u32,
}

/// Retry strategy
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Create strategy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Strategy with default parameters
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate delay for nth retry with exponential backoff + jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Execute operation with retry logic.
    ///
    /// `operation` receives the zero-based attempt number. Non-retryable
    /// errors end the loop immediately.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        operation_name: &str,
    ) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_delay(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying"
                );
                tokio::time::sleep(delay).await;
            }

            attempts += 1;
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation = operation_name, attempt, "Succeeded on retry");
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(e) => {
                    if !e.is_retryable() {
                        warn!(operation = operation_name, error = %e, "Non-retryable error");
                        return Attempted {
                            result: Err(e),
                            attempts,
                        };
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        of = self.config.max_retries + 1,
                        error = %e,
                        "Attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Attempted {
            result: Err(last_error
                .unwrap_or_else(|| Error::Other("Max retries exceeded without error".to_string()))),
            attempts,
        }
    }
}
