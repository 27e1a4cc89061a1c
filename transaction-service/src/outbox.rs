//! Outbox relay
//!
//! Moves settlement events from the transaction ledger's outbox onto the
//! channel. Entries go out oldest first; the first publish failure ends the
//! tick so a later event never overtakes an earlier one. A crash between
//! publish and mark re-sends the entry, which consumer dedup absorbs.

use crate::{config::OutboxConfig, metrics::Metrics, store::TransactionStore, Result};
use message_bus::{Message, MessageType, PartitionKey, Publisher};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Outbox relay
pub struct OutboxRelay {
    store: Arc<dyn TransactionStore>,
    publisher: Publisher,
    config: OutboxConfig,
    metrics: Metrics,
}

impl std::fmt::Debug for OutboxRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxRelay")
            .field("config", &self.config)
            .finish()
    }
}

impl OutboxRelay {
    /// Create relay
    pub fn new(
        store: Arc<dyn TransactionStore>,
        publisher: Publisher,
        config: OutboxConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics,
        }
    }

    /// Publish up to one batch; returns how many entries went out
    pub async fn relay_once(&self) -> Result<usize> {
        let pending = self.store.pending_outbox(self.config.batch_size)?;
        let mut published = 0;

        for entry in pending {
            let message = Message::encode(
                MessageType::SettlementEvent,
                PartitionKey::account(entry.event.sender_id),
                &entry.event,
            )?
            .with_idempotency_key(entry.transfer_id.to_string());

            match self.publisher.publish(&message).await {
                Ok(()) => {
                    self.store.mark_published(&entry.transfer_id)?;
                    self.metrics.outbox_published.inc();
                    published += 1;
                    debug!(transfer_id = %entry.transfer_id, "Settlement event published");
                }
                Err(e) => {
                    self.metrics.outbox_failures.inc();
                    warn!(
                        transfer_id = %entry.transfer_id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Settlement event publish failed, will retry"
                    );
                    self.store
                        .record_publish_failure(&entry.transfer_id, &e.to_string())?;
                    break;
                }
            }
        }

        Ok(published)
    }

    /// Relay every poll interval until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            "Outbox relay started"
        );

        loop {
            match self.relay_once().await {
                // full batch: more may be waiting
                Ok(n) if n == self.config.batch_size && n > 0 => continue,
                Ok(_) => {}
                Err(e) => error!(error = %e, "Outbox relay tick failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Outbox relay stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OutboxEntry};
    use async_trait::async_trait;
    use chrono::Utc;
    use message_bus::{
        InMemoryTransport, MessageHandler, PublisherConfig, Subscription, Transport,
    };
    use protocol::{AccountId, SettlementEvent, TransferId, TransferRecord, TransferStatus};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Transport that rejects sends while `down` is set
    struct Switchable {
        inner: InMemoryTransport,
        down: AtomicBool,
    }

    #[async_trait]
    impl Transport for Switchable {
        async fn send(&self, message: &Message) -> message_bus::Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(message_bus::Error::Connection("broker unreachable".into()));
            }
            self.inner.send(message).await
        }

        async fn subscribe(
            &self,
            message_type: MessageType,
            group: &str,
            handler: Arc<dyn MessageHandler>,
        ) -> message_bus::Result<Subscription> {
            self.inner.subscribe(message_type, group, handler).await
        }
    }

    fn completed(store: &MemoryStore, sender: AccountId) -> TransferRecord {
        let record = TransferRecord {
            id: TransferId::generate(),
            sender_id: sender,
            receiver_id: AccountId::random(),
            amount: dec!(5.00),
            status: TransferStatus::Completed,
            created_at: Utc::now(),
        };
        store
            .insert_with_outbox(&record, &OutboxEntry::for_record(&record))
            .unwrap();
        record
    }

    fn relay(store: Arc<MemoryStore>, transport: Arc<Switchable>, batch_size: usize) -> OutboxRelay {
        let publisher = Publisher::new(
            transport,
            PublisherConfig {
                max_retry_attempts: 1,
                initial_retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(1),
                ..PublisherConfig::default()
            },
        );
        OutboxRelay::new(
            store,
            publisher,
            OutboxConfig {
                batch_size,
                poll_interval_ms: 10,
            },
            Metrics::new().unwrap(),
        )
    }

    fn switchable() -> Arc<Switchable> {
        Arc::new(Switchable {
            inner: InMemoryTransport::default(),
            down: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn test_relay_publishes_in_order_with_transfer_id_key() {
        let store = Arc::new(MemoryStore::new());
        let transport = switchable();
        let sender = AccountId::random();
        let first = completed(&store, sender);
        let second = completed(&store, sender);

        let relay = relay(store.clone(), transport.clone(), 100);
        assert_eq!(relay.relay_once().await.unwrap(), 2);
        assert!(store.pending_outbox(10).unwrap().is_empty());

        let messages = transport.inner.messages(MessageType::SettlementEvent);
        assert_eq!(messages.len(), 2);
        // one sender, one partition, publish order
        let events: Vec<SettlementEvent> =
            messages.iter().map(|m| m.decode().unwrap()).collect();
        assert_eq!(events[0].transfer_id, first.id);
        assert_eq!(events[1].transfer_id, second.id);
        assert_eq!(messages[0].idempotency_key, Some(first.id.to_string()));
        assert_eq!(messages[0].partition_key, PartitionKey::account(sender));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_entry_and_stops_batch() {
        let store = Arc::new(MemoryStore::new());
        let transport = switchable();
        let first = completed(&store, AccountId::random());
        completed(&store, AccountId::random());

        transport.down.store(true, Ordering::SeqCst);
        let relay = relay(store.clone(), transport.clone(), 100);

        assert_eq!(relay.relay_once().await.unwrap(), 0);
        let pending = store.pending_outbox(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].transfer_id, first.id);
        assert_eq!(pending[0].attempts, 1);
        // the second entry was never tried
        assert_eq!(pending[1].attempts, 0);

        transport.down.store(false, Ordering::SeqCst);
        assert_eq!(relay.relay_once().await.unwrap(), 2);
        assert!(store.pending_outbox(10).unwrap().is_empty());
        assert_eq!(transport.inner.len(MessageType::SettlementEvent), 2);
    }

    #[tokio::test]
    async fn test_batch_size_respected() {
        let store = Arc::new(MemoryStore::new());
        let transport = switchable();
        for _ in 0..3 {
            completed(&store, AccountId::random());
        }

        let relay = relay(store.clone(), transport, 2);
        assert_eq!(relay.relay_once().await.unwrap(), 2);
        assert_eq!(relay.relay_once().await.unwrap(), 1);
        assert_eq!(relay.relay_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let transport = switchable();
        let relay = Arc::new(relay(store.clone(), transport.clone(), 100));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(shutdown_rx).await }
        });

        completed(&store, AccountId::random());
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.inner.len(MessageType::SettlementEvent) != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(store.pending_outbox(10).unwrap().is_empty());
    }
}
