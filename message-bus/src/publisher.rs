//! Message publisher with retry logic

use crate::{
    message::Message,
    metrics::{MESSAGE_PUBLISH_DURATION, MESSAGE_PUBLISH_TOTAL},
    transport::Transport,
    Error, Result,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Publish timeout per attempt
    pub publish_timeout: Duration,

    /// Max retry attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Message publisher
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    config: PublisherConfig,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish()
    }
}

impl Publisher {
    /// Create new publisher
    pub fn new(transport: Arc<dyn Transport>, config: PublisherConfig) -> Self {
        Self { transport, config }
    }

    /// Publish message
    pub async fn publish(&self, message: &Message) -> Result<()> {
        let start = Instant::now();
        let label = message.message_type.as_str();

        debug!(
            message_id = %message.id,
            subject = %message.subject(),
            "Publishing message"
        );

        let result = self.publish_with_retry(message).await;

        MESSAGE_PUBLISH_DURATION
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&[label, status])
            .inc();

        result
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, message: &Message) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(message).await {
                Ok(_) => {
                    if attempts > 1 {
                        info!(
                            message_id = %message.id,
                            attempts,
                            "Message published after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts.max(1) {
                        error!(
                            message_id = %message.id,
                            attempts,
                            error = %e,
                            "Failed to publish"
                        );
                        return Err(e);
                    }

                    warn!(
                        message_id = %message.id,
                        attempt = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    // Exponential backoff
                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    /// Single publish attempt
    async fn publish_once(&self, message: &Message) -> Result<()> {
        let timeout = self.config.publish_timeout;
        tokio::time::timeout(timeout, self.transport.send(message))
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::InMemoryTransport,
        subscriber::MessageHandler,
        transport::Subscription,
        types::{MessageType, PartitionKey},
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Rejects the first `failures` sends, then forwards
    struct Unreliable {
        inner: InMemoryTransport,
        failures: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Transport for Unreliable {
        async fn send(&self, message: &Message) -> Result<()> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::Connection("broker unavailable".to_string()));
            }
            self.inner.send(message).await
        }

        async fn subscribe(
            &self,
            message_type: MessageType,
            group: &str,
            handler: Arc<dyn MessageHandler>,
        ) -> Result<Subscription> {
            self.inner.subscribe(message_type, group, handler).await
        }
    }

    fn fast_config(max_retry_attempts: u32) -> PublisherConfig {
        PublisherConfig {
            publish_timeout: Duration::from_secs(1),
            max_retry_attempts,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
        }
    }

    fn message() -> Message {
        Message::new(
            MessageType::SettlementEvent,
            PartitionKey::account("alice"),
            json!({}),
        )
    }

    #[test]
    fn test_publish_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_publish_retries_transient_failures() {
        let transport = Arc::new(Unreliable {
            inner: InMemoryTransport::default(),
            failures: 2,
            attempts: AtomicU32::new(0),
        });
        let publisher = Publisher::new(transport.clone(), fast_config(3));

        publisher.publish(&message()).await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(transport.inner.len(MessageType::SettlementEvent), 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_max_attempts() {
        let transport = Arc::new(Unreliable {
            inner: InMemoryTransport::default(),
            failures: 10,
            attempts: AtomicU32::new(0),
        });
        let publisher = Publisher::new(transport.clone(), fast_config(2));

        let err = publisher.publish(&message()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert!(transport.inner.is_empty(MessageType::SettlementEvent));
    }
}
