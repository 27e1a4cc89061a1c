//! Message subscriber with consumer groups

use crate::{
    message::Message,
    metrics::{MESSAGE_PROCESS_DURATION, MESSAGE_RECEIVE_TOTAL},
    transport::{Subscription, Transport},
    types::MessageType,
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Message handler trait
///
/// `Ok` acknowledges the message. `Err` leaves it unacknowledged and the
/// transport delivers it again.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle incoming message
    async fn handle(&self, message: Message) -> Result<()>;
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Consumer group name (for load balancing)
    pub consumer_group: String,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            consumer_group: "wallet-group".to_string(),
        }
    }
}

/// Message subscriber
pub struct Subscriber {
    transport: Arc<dyn Transport>,
    config: SubscriberConfig,
    message_type: MessageType,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("config", &self.config)
            .field("message_type", &self.message_type)
            .finish()
    }
}

impl Subscriber {
    /// Create new subscriber
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SubscriberConfig,
        message_type: MessageType,
    ) -> Self {
        Self {
            transport,
            config,
            message_type,
        }
    }

    /// Subscribe and process messages
    pub async fn subscribe<H>(&self, handler: Arc<H>) -> Result<Subscription>
    where
        H: MessageHandler + 'static,
    {
        info!(
            message_type = %self.message_type,
            group = %self.config.consumer_group,
            "Subscribing"
        );

        let metered = Arc::new(MeteredHandler {
            inner: handler,
            message_type: self.message_type,
        });

        self.transport
            .subscribe(self.message_type, &self.config.consumer_group, metered)
            .await
    }
}

/// Records receive/process metrics around another handler
struct MeteredHandler<H> {
    inner: Arc<H>,
    message_type: MessageType,
}

#[async_trait]
impl<H: MessageHandler + 'static> MessageHandler for MeteredHandler<H> {
    async fn handle(&self, message: Message) -> Result<()> {
        let start = Instant::now();
        let id = message.id;
        let label = self.message_type.as_str();

        let result = self.inner.handle(message).await;

        let status = match &result {
            Ok(()) => "success",
            Err(e) => {
                error!(message_id = %id, error = %e, "Error handling message");
                "error"
            }
        };
        MESSAGE_RECEIVE_TOTAL.with_label_values(&[label, status]).inc();
        MESSAGE_PROCESS_DURATION
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        result
    }
}
