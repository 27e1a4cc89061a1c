//! In-process transport
//!
//! A partitioned append-only log per message type. Each consumer group owns
//! one cursor per partition and one delivery task per partition per
//! subscription. A cursor only moves past a message after a handler returned
//! `Ok`, so a failing message is redelivered (after `redelivery_delay`) and
//! blocks the rest of its partition until it succeeds.
//!
//! The log is never trimmed: messages stay for the life of the transport,
//! even after every group acknowledged them, so a group created later still
//! starts from offset zero. Memory grows with the number of messages sent.
//! Deployments that need bounded retention use the JetStream transport and
//! its `max_age`.

use crate::{
    message::Message,
    metrics::MESSAGE_REDELIVERY_TOTAL,
    partitioning::{HashPartitioning, PartitioningStrategy},
    subscriber::MessageHandler,
    transport::{Subscription, Transport},
    types::MessageType,
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// In-memory transport configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Number of partitions per message type
    pub partitions: u32,
    /// Pause before a rejected message is delivered again
    pub redelivery_delay: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            redelivery_delay: Duration::from_millis(100),
        }
    }
}

struct Topic {
    partitions: Vec<RwLock<Vec<Message>>>,
    appended: watch::Sender<u64>,
}

impl Topic {
    fn new(partitions: u32) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            partitions: (0..partitions).map(|_| RwLock::new(Vec::new())).collect(),
            appended,
        }
    }

    fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.read().len()).sum()
    }
}

struct GroupCursor {
    offsets: Vec<Mutex<usize>>,
}

/// In-memory, partitioned, at-least-once transport with unbounded retention
pub struct InMemoryTransport {
    config: InMemoryConfig,
    partitioning: HashPartitioning,
    topics: RwLock<HashMap<MessageType, Arc<Topic>>>,
    groups: RwLock<HashMap<(MessageType, String), Arc<GroupCursor>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("config", &self.config)
            .field("topics", &self.topics.read().len())
            .finish()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl InMemoryTransport {
    /// Create a transport
    pub fn new(config: InMemoryConfig) -> Self {
        let partitioning = HashPartitioning::new(config.partitions);
        Self {
            config,
            partitioning,
            topics: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn topic(&self, message_type: MessageType) -> Arc<Topic> {
        if let Some(topic) = self.topics.read().get(&message_type) {
            return topic.clone();
        }
        self.topics
            .write()
            .entry(message_type)
            .or_insert_with(|| Arc::new(Topic::new(self.partitioning.num_partitions())))
            .clone()
    }

    fn cursor(&self, message_type: MessageType, group: &str) -> Arc<GroupCursor> {
        let key = (message_type, group.to_string());
        if let Some(cursor) = self.groups.read().get(&key) {
            return cursor.clone();
        }
        let partitions = self.partitioning.num_partitions();
        self.groups
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(GroupCursor {
                    offsets: (0..partitions).map(|_| Mutex::new(0)).collect(),
                })
            })
            .clone()
    }

    /// Every message published for `message_type`, partition by partition
    pub fn messages(&self, message_type: MessageType) -> Vec<Message> {
        let topic = self.topic(message_type);
        let mut all = Vec::new();
        for partition in &topic.partitions {
            all.extend(partition.read().iter().cloned());
        }
        all
    }

    /// Number of published messages for `message_type`
    pub fn len(&self, message_type: MessageType) -> usize {
        self.topic(message_type).len()
    }

    /// Whether nothing was published for `message_type`
    pub fn is_empty(&self, message_type: MessageType) -> bool {
        self.len(message_type) == 0
    }

    /// Messages `group` has not acknowledged yet. Waits for in-flight handlers.
    pub async fn lag(&self, message_type: MessageType, group: &str) -> usize {
        let topic = self.topic(message_type);
        let cursor = self.cursor(message_type, group);
        let mut lag = 0;
        for (partition, offset) in topic.partitions.iter().zip(&cursor.offsets) {
            let offset = *offset.lock().await;
            lag += partition.read().len().saturating_sub(offset);
        }
        lag
    }

    /// Refuse further sends and subscriptions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let topic = self.topic(message.message_type);
        let partition = self.partitioning.partition(&message.partition_key) as usize;
        topic.partitions[partition].write().push(message.clone());
        topic.appended.send_modify(|seq| *seq += 1);

        debug!(
            message_id = %message.id,
            subject = %message.subject(),
            partition,
            "Message appended"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        message_type: MessageType,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let topic = self.topic(message_type);
        let cursor = self.cursor(message_type, group);
        let (shutdown_tx, _) = watch::channel(false);

        let tasks = (0..topic.partitions.len())
            .map(|partition| {
                let delivery = Delivery {
                    topic: topic.clone(),
                    cursor: cursor.clone(),
                    partition,
                    message_type,
                    handler: handler.clone(),
                    redelivery_delay: self.config.redelivery_delay,
                };
                tokio::spawn(delivery.run(shutdown_tx.subscribe()))
            })
            .collect();

        info!(
            message_type = %message_type,
            group,
            partitions = topic.partitions.len(),
            "In-memory subscription started"
        );

        Ok(Subscription::new(shutdown_tx, tasks))
    }
}

/// Delivery loop of one group over one partition
struct Delivery {
    topic: Arc<Topic>,
    cursor: Arc<GroupCursor>,
    partition: usize,
    message_type: MessageType,
    handler: Arc<dyn MessageHandler>,
    redelivery_delay: Duration,
}

impl Delivery {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut appended = self.topic.appended.subscribe();

        loop {
            if *shutdown.borrow() {
                return;
            }
            appended.borrow_and_update();

            let mut offset = self.cursor.offsets[self.partition].lock().await;
            let next = self.topic.partitions[self.partition]
                .read()
                .get(*offset)
                .cloned();

            let message = match next {
                Some(message) => message,
                None => {
                    drop(offset);
                    tokio::select! {
                        changed = appended.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = shutdown.changed() => return,
                    }
                    continue;
                }
            };

            let message_id = message.id;
            let outcome = tokio::select! {
                result = self.handler.handle(message) => Some(result),
                _ = shutdown.changed() => None,
            };

            match outcome {
                Some(Ok(())) => *offset += 1,
                Some(Err(e)) => {
                    drop(offset);
                    MESSAGE_REDELIVERY_TOTAL
                        .with_label_values(&[self.message_type.as_str()])
                        .inc();
                    warn!(
                        message_id = %message_id,
                        partition = self.partition,
                        error = %e,
                        "Handler rejected message, redelivering"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.redelivery_delay) => {}
                        _ = shutdown.changed() => return,
                    }
                }
                None => return,
            }
        }
    }
}
