//! JetStream integration for persistent messaging
//!
//! Provides at-least-once delivery with:
//! - One persistent stream per message type
//! - Durable pull consumers per consumer group
//! - Deduplication via idempotency keys (`Nats-Msg-Id`)
//! - Nak on handler error, Term on unparsable payloads

use async_nats::jetstream::{
    self,
    consumer::{self, pull},
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context as JetStreamContext,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    metrics::MESSAGE_RECEIVE_TOTAL,
    subscriber::MessageHandler,
    transport::{Subscription, Transport},
    Error, Message, MessageType, Result,
};

/// NATS connection and stream settings
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,
    /// Window in which a repeated `Nats-Msg-Id` is dropped
    pub duplicate_window: Duration,
    /// How long the server waits for an ack before redelivering
    pub ack_wait: Duration,
    /// Delivery attempts per message
    pub max_deliver: i64,
    /// Retention of stream messages
    pub max_age: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            duplicate_window: Duration::from_secs(300),
            ack_wait: Duration::from_secs(30),
            max_deliver: 10,
            max_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl NatsConfig {
    /// Defaults overridden by `NATS_URL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("NATS_URL") {
            config.url = url;
        }
        config
    }
}

/// Transport over NATS JetStream
pub struct JetStreamTransport {
    context: JetStreamContext,
    config: NatsConfig,
    streams: Mutex<HashSet<MessageType>>,
}

impl std::fmt::Debug for JetStreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl JetStreamTransport {
    /// Connect to the server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS JetStream");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            context: jetstream::new(client),
            config,
            streams: Mutex::new(HashSet::new()),
        })
    }

    /// Create the stream for `message_type` if this process has not yet
    async fn ensure_stream(&self, message_type: MessageType) -> Result<()> {
        if self.streams.lock().contains(&message_type) {
            return Ok(());
        }

        let stream_name = message_type.stream_name();
        let config = StreamConfig {
            name: stream_name.to_string(),
            subjects: vec![format!("{}.>", message_type.subject_prefix())],
            retention: RetentionPolicy::Limits,
            max_age: self.config.max_age,
            storage: StorageType::File,
            duplicate_window: self.config.duplicate_window,
            ..Default::default()
        };

        self.context
            .get_or_create_stream(config)
            .await
            .map_err(|e| Error::JetStream(format!("stream {}: {}", stream_name, e)))?;

        info!(stream = stream_name, "Stream ready");
        self.streams.lock().insert(message_type);
        Ok(())
    }
}

#[async_trait]
impl Transport for JetStreamTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        self.ensure_stream(message.message_type).await?;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.dedup_key().as_str());

        let payload = message.to_bytes()?;
        self.context
            .publish_with_headers(message.subject(), headers, bytes::Bytes::from(payload))
            .await
            .map_err(|e| Error::Publish(e.to_string()))?
            .await
            .map_err(|e| Error::JetStream(format!("Publish ack failed: {}", e)))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        message_type: MessageType,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        self.ensure_stream(message_type).await?;

        let consumer_config = pull::Config {
            durable_name: Some(group.to_string()),
            filter_subject: format!("{}.>", message_type.subject_prefix()),
            ack_policy: consumer::AckPolicy::Explicit,
            ack_wait: self.config.ack_wait,
            max_deliver: self.config.max_deliver,
            deliver_policy: consumer::DeliverPolicy::All,
            ..Default::default()
        };

        let consumer = self
            .context
            .get_stream(message_type.stream_name())
            .await
            .map_err(|e| Error::JetStream(e.to_string()))?
            .create_consumer(consumer_config)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        info!(
            stream = message_type.stream_name(),
            group, "JetStream consumer created"
        );

        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let label = message_type.as_str();

        let task = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = messages.next() => next,
                    _ = shutdown.changed() => return,
                };

                let msg = match next {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(error = %e, "JetStream pull failed");
                        continue;
                    }
                    None => return,
                };

                match Message::from_bytes(&msg.payload) {
                    Ok(message) => {
                        let message_id = message.id;
                        match handler.handle(message).await {
                            Ok(()) => {
                                if let Err(e) = msg.ack().await {
                                    error!(message_id = %message_id, error = %e, "Failed to ack message");
                                }
                            }
                            Err(e) => {
                                warn!(message_id = %message_id, error = %e, "Handler rejected message, nak");
                                if let Err(nak_err) =
                                    msg.ack_with(jetstream::AckKind::Nak(None)).await
                                {
                                    error!(message_id = %message_id, error = %nak_err, "Failed to nak message");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to parse message");
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&[label, "parse_error"])
                            .inc();

                        // Terminate bad message (won't be redelivered)
                        if let Err(term_err) = msg.ack_with(jetstream::AckKind::Term).await {
                            error!(error = %term_err, "Failed to terminate bad message");
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(shutdown_tx, vec![task]))
    }
}
