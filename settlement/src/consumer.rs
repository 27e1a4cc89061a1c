//! Settlement consumer
//!
//! Applies settlement events from the channel to the wallet ledger. An event
//! is acknowledged only after it was applied, recognised as a replay, or
//! handed to the dead-letter queue. If even dead-lettering fails the handler
//! returns an error and the channel redelivers.

use crate::{
    config::ConsumerConfig,
    retry::{Attempted, RetryStrategy},
    state::{SettlementState, StateTracker},
    Error, Result,
};
use async_trait::async_trait;
use message_bus::{
    DlqRouter, Message, MessageHandler, MessageType, Subscriber, SubscriberConfig, Subscription,
    Transport,
};
use protocol::SettlementEvent;
use std::sync::Arc;
use tracing::{error, info, warn};
use wallet_ledger::{ApplyOutcome, Ledger};

/// Settlement consumer
pub struct SettlementConsumer {
    ledger: Arc<Ledger>,
    dlq: Arc<DlqRouter>,
    retry: RetryStrategy,
    states: StateTracker,
    config: ConsumerConfig,
}

impl std::fmt::Debug for SettlementConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementConsumer")
            .field("config", &self.config)
            .field("in_flight", &self.states.in_flight())
            .finish()
    }
}

impl SettlementConsumer {
    /// Create consumer
    pub fn new(ledger: Arc<Ledger>, dlq: Arc<DlqRouter>, config: ConsumerConfig) -> Self {
        Self {
            ledger,
            dlq,
            retry: RetryStrategy::new(config.retry.clone()),
            states: StateTracker::new(),
            config,
        }
    }

    /// Subscribe to settlement events as a member of the configured group
    pub async fn subscribe(self: Arc<Self>, transport: Arc<dyn Transport>) -> Result<Subscription> {
        let subscriber = Subscriber::new(
            transport,
            SubscriberConfig {
                consumer_group: self.config.consumer_group.clone(),
            },
            MessageType::SettlementEvent,
        );

        let subscription = subscriber.subscribe(self.clone()).await?;
        info!(group = %self.config.consumer_group, "Settlement consumer subscribed");
        Ok(subscription)
    }

    /// State tracker
    pub fn states(&self) -> &StateTracker {
        &self.states
    }

    /// Dead-letter router
    pub fn dlq(&self) -> &DlqRouter {
        &self.dlq
    }

    /// Process one delivered message; `Ok` means it may be acknowledged
    pub async fn process(&self, message: Message) -> Result<SettlementState> {
        let event: SettlementEvent = match message.decode() {
            Ok(event) => event,
            Err(e) => {
                self.states.begin(message.id);
                warn!(message_id = %message.id, error = %e, "Undecodable settlement event");
                let reason = format!("decode: {}", e);
                self.dead_letter(message.id, message, reason, 0, false).await?;
                return Ok(SettlementState::DeadLettered);
            }
        };

        let key = *event.transfer_id.as_uuid();
        self.states.begin(key);

        let this = self;
        let pending = &event;
        let Attempted { result, attempts } = self
            .retry
            .execute_with_retry(
                move |attempt| {
                    if attempt > 0 {
                        this.states.transition(key, SettlementState::RetryPending);
                    }
                    this.apply(pending.clone())
                },
                "apply_settlement",
            )
            .await;

        match result {
            Ok(ApplyOutcome::Applied { overdraft, .. }) => {
                self.states.transition(key, SettlementState::Applied);
                info!(
                    transfer_id = %event.transfer_id,
                    sender_id = %event.sender_id,
                    receiver_id = %event.receiver_id,
                    amount = %event.amount,
                    attempts,
                    overdraft,
                    "Settlement applied"
                );
                Ok(SettlementState::Applied)
            }
            Ok(ApplyOutcome::Duplicate) => {
                self.states.transition(key, SettlementState::Duplicate);
                info!(transfer_id = %event.transfer_id, "Duplicate settlement ignored");
                Ok(SettlementState::Duplicate)
            }
            Err(e) => {
                let reprocessable = e.is_reprocessable();
                error!(
                    transfer_id = %event.transfer_id,
                    attempts,
                    retryable = e.is_retryable(),
                    reprocessable,
                    error = %e,
                    "Settlement could not be applied"
                );
                self.dead_letter(key, message, e.to_string(), attempts, reprocessable)
                    .await?;
                Ok(SettlementState::DeadLettered)
            }
        }
    }

    async fn apply(&self, event: SettlementEvent) -> Result<ApplyOutcome> {
        let transfer_id = event.transfer_id;
        self.ledger
            .apply_settlement(event)
            .await
            .map_err(|e| Error::apply_failure(transfer_id, e))
    }

    async fn dead_letter(
        &self,
        key: uuid::Uuid,
        message: Message,
        reason: String,
        attempts: u32,
        reprocessable: bool,
    ) -> Result<()> {
        self.dlq
            .route(message, reason, attempts, reprocessable)
            .await?;
        self.states.transition(key, SettlementState::DeadLettered);
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for SettlementConsumer {
    async fn handle(&self, message: Message) -> message_bus::Result<()> {
        let message_id = message.id;
        self.process(message).await.map(|_| ()).map_err(|e| {
            error!(message_id = %message_id, error = %e, "Dead-lettering failed, leaving unacknowledged");
            message_bus::Error::Handler(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use chrono::Utc;
    use message_bus::{InMemoryTransport, PartitionKey, Publisher, PublisherConfig};
    use protocol::{AccountId, Currency, TransferId};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    struct Fixture {
        ledger: Arc<Ledger>,
        transport: Arc<InMemoryTransport>,
        consumer: Arc<SettlementConsumer>,
        sender: AccountId,
        receiver: AccountId,
    }

    async fn fixture(sender_balance: Decimal) -> Fixture {
        let ledger = Arc::new(Ledger::open(wallet_ledger::Config::default()).await.unwrap());
        let sender = ledger
            .open_account(AccountId::random(), sender_balance, Currency::USD)
            .await
            .unwrap()
            .account_id;
        let receiver = ledger
            .open_account(AccountId::random(), dec!(0), Currency::USD)
            .await
            .unwrap()
            .account_id;

        let transport = Arc::new(InMemoryTransport::default());
        let publisher = Publisher::new(transport.clone(), PublisherConfig::default());
        let config = ConsumerConfig {
            retry: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 2,
                ..RetryConfig::default()
            },
            ..ConsumerConfig::default()
        };
        let consumer = Arc::new(SettlementConsumer::new(
            ledger.clone(),
            Arc::new(DlqRouter::new(publisher)),
            config,
        ));

        Fixture {
            ledger,
            transport,
            consumer,
            sender,
            receiver,
        }
    }

    fn message(event: &SettlementEvent) -> Message {
        Message::encode(
            MessageType::SettlementEvent,
            PartitionKey::account(event.sender_id),
            event,
        )
        .unwrap()
        .with_idempotency_key(event.transfer_id.to_string())
    }

    fn balance(ledger: &Ledger, id: &AccountId) -> Decimal {
        ledger.account(id).unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_apply_then_duplicate() {
        let f = fixture(dec!(100.00)).await;
        let event = SettlementEvent::new(
            TransferId::generate(),
            f.sender,
            f.receiver,
            dec!(50.00),
            Utc::now(),
        );

        let first = f.consumer.process(message(&event)).await.unwrap();
        assert_eq!(first, SettlementState::Applied);

        // redelivery of the same event, even as a different message
        let second = f.consumer.process(message(&event)).await.unwrap();
        assert_eq!(second, SettlementState::Duplicate);

        assert_eq!(balance(&f.ledger, &f.sender), dec!(50.00));
        assert_eq!(balance(&f.ledger, &f.receiver), dec!(50.00));
        assert_eq!(f.consumer.states().count(SettlementState::Applied), 1);
        assert_eq!(f.consumer.states().count(SettlementState::Duplicate), 1);
        assert_eq!(f.consumer.states().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_debit_is_unconditional() {
        let f = fixture(dec!(10.00)).await;
        let event = SettlementEvent::new(
            TransferId::generate(),
            f.sender,
            f.receiver,
            dec!(25.00),
            Utc::now(),
        );

        let state = f.consumer.process(message(&event)).await.unwrap();
        assert_eq!(state, SettlementState::Applied);
        assert_eq!(balance(&f.ledger, &f.sender), dec!(-15.00));
        assert_eq!(f.ledger.metrics().overdrafts.get(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_dead_lettered() {
        let f = fixture(dec!(1)).await;
        let garbage = Message::new(
            MessageType::SettlementEvent,
            PartitionKey::Broadcast,
            json!({"senderId": "nope"}),
        );

        let state = f.consumer.process(garbage).await.unwrap();
        assert_eq!(state, SettlementState::DeadLettered);

        let entries = f.consumer.dlq().list_entries(false, 10);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].reprocessable);
        assert!(entries[0].failure_reason.starts_with("decode"));
        assert_eq!(f.transport.len(MessageType::DeadLetter), 1);
    }

    #[tokio::test]
    async fn test_unknown_account_dead_lettered_then_replayed() {
        let f = fixture(dec!(100)).await;
        let late_receiver = AccountId::random();
        let event = SettlementEvent::new(
            TransferId::generate(),
            f.sender,
            late_receiver,
            dec!(5),
            Utc::now(),
        );

        let state = f.consumer.process(message(&event)).await.unwrap();
        assert_eq!(state, SettlementState::DeadLettered);
        assert_eq!(f.consumer.states().count(SettlementState::RetryPending), 0);

        let entry = f.consumer.dlq().list_entries(false, 10)[0].clone();
        assert_eq!(entry.retry_count, 1);
        assert!(entry.reprocessable);
        assert_eq!(balance(&f.ledger, &f.sender), dec!(100));

        // the receiver shows up later; the operator replays the entry
        f.ledger
            .open_account(late_receiver, dec!(0), Currency::USD)
            .await
            .unwrap();
        let replay = f.consumer.dlq().reprocess(&entry.id).await.unwrap();
        assert!(f.consumer.dlq().get_entry(&entry.id).is_none());

        let state = f.consumer.process(replay).await.unwrap();
        assert_eq!(state, SettlementState::Applied);
        assert_eq!(balance(&f.ledger, &f.sender), dec!(95));
        assert_eq!(balance(&f.ledger, &late_receiver), dec!(5));
    }

    #[tokio::test]
    async fn test_invalid_settlement_not_reprocessable() {
        let f = fixture(dec!(100)).await;
        let event = SettlementEvent::new(
            TransferId::generate(),
            f.sender,
            f.sender,
            dec!(5),
            Utc::now(),
        );

        let state = f.consumer.process(message(&event)).await.unwrap();
        assert_eq!(state, SettlementState::DeadLettered);

        let entry = f.consumer.dlq().list_entries(false, 10)[0].clone();
        assert!(!entry.reprocessable);
        assert!(f.consumer.dlq().reprocess(&entry.id).await.is_err());
    }

    #[tokio::test]
    async fn test_ledger_down_retries_then_dead_letters() {
        let f = fixture(dec!(100)).await;
        f.ledger.shutdown().await.unwrap();
        // let the actor drain its mailbox and exit
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let event = SettlementEvent::new(
            TransferId::generate(),
            f.sender,
            f.receiver,
            dec!(5),
            Utc::now(),
        );

        let state = f.consumer.process(message(&event)).await.unwrap();
        assert_eq!(state, SettlementState::DeadLettered);
        assert_eq!(f.consumer.states().count(SettlementState::RetryPending), 2);

        let entry = &f.consumer.dlq().list_entries(true, 10)[0];
        assert_eq!(entry.retry_count, 3);
        assert!(entry.reprocessable);
    }

    #[tokio::test]
    async fn test_dlq_failure_surfaces_as_handler_error() {
        let f = fixture(dec!(100)).await;
        f.transport.close();

        let garbage = Message::new(
            MessageType::SettlementEvent,
            PartitionKey::Broadcast,
            json!(42),
        );
        let result = f.consumer.handle(garbage).await;
        assert!(matches!(result, Err(message_bus::Error::Handler(_))));
    }

    #[tokio::test]
    async fn test_subscribed_consumer_applies_published_events() {
        let f = fixture(dec!(100)).await;
        let _subscription = f
            .consumer
            .clone()
            .subscribe(f.transport.clone())
            .await
            .unwrap();

        for _ in 0..4 {
            let event = SettlementEvent::new(
                TransferId::generate(),
                f.sender,
                f.receiver,
                dec!(10),
                Utc::now(),
            );
            f.transport.send(&message(&event)).await.unwrap();
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while f.transport.lag(MessageType::SettlementEvent, "wallet-group").await > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(balance(&f.ledger, &f.sender), dec!(60));
        assert_eq!(balance(&f.ledger, &f.receiver), dec!(40));
    }
}
