//! Transport abstraction
//!
//! A transport stores published messages per partition and delivers them to
//! consumer groups at least once. Each group sees every message; within a
//! group a message is handled by one subscriber at a time, and a partition
//! only advances once its current message was handled successfully.

use crate::{message::Message, subscriber::MessageHandler, types::MessageType, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Broker the publisher and subscribers talk to
#[async_trait]
pub trait Transport: Send + Sync {
    /// Durably accept a message; returns once the broker acknowledged it
    async fn send(&self, message: &Message) -> Result<()>;

    /// Start delivering `message_type` to `handler` as a member of `group`
    async fn subscribe(
        &self,
        message_type: MessageType,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription>;
}

/// Running subscription; delivery stops when it is dropped
#[derive(Debug)]
pub struct Subscription {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap delivery tasks listening on `shutdown`
    pub fn new(shutdown: watch::Sender<bool>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { shutdown, tasks }
    }

    /// Whether any delivery task is still running
    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Stop delivery and wait for the tasks to exit. A message being handled
    /// at that moment is not acknowledged and will be delivered again.
    pub async fn unsubscribe(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Delivery task ended abnormally");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
