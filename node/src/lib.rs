//! Transfer rail node
//!
//! Runs both sides of the rail in one process: the wallet ledger with its
//! balance oracle, hold sweeper and settlement consumer, and the transaction
//! service with its orchestrator and outbox relay. The sides share the
//! oracle channel and the settlement event channel; the sweeper also reads
//! transaction records before expiring a hold.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod authority;
pub mod config;

pub use authority::StoreAuthority;
pub use config::{demo_seed_accounts, BusConfig, NodeConfig, TransportKind};

use message_bus::{
    DlqRouter, InMemoryTransport, JetStreamTransport, Publisher, PublisherConfig, Subscription,
    Transport,
};
use protocol::{oracle_channel, serve_oracle, BalanceOracle};
use settlement::{Reconciler, SettlementConsumer};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use transaction_service::{open_store, Metrics, OutboxRelay, TransactionStore, TransferOrchestrator};
use wallet_ledger::{HoldSweeper, Ledger, LedgerOracle, LedgerStorage, SweeperConfig};

/// Wraps the oracle the wallet side serves, e.g. to add latency in tests
pub type OracleLayer = Box<dyn FnOnce(Arc<dyn BalanceOracle>) -> Arc<dyn BalanceOracle> + Send>;

/// Assembles a [`Node`]
pub struct NodeBuilder {
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
    ledger_storage: Option<Arc<dyn LedgerStorage>>,
    oracle_layer: Option<OracleLayer>,
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_ledger_storage", &self.ledger_storage.is_some())
            .finish()
    }
}

impl NodeBuilder {
    /// Use `transport` instead of the configured one
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `storage` for the wallet ledger instead of the configured backend
    pub fn ledger_storage(mut self, storage: Arc<dyn LedgerStorage>) -> Self {
        self.ledger_storage = Some(storage);
        self
    }

    /// Wrap the served balance oracle
    pub fn oracle_layer(mut self, layer: OracleLayer) -> Self {
        self.oracle_layer = Some(layer);
        self
    }

    /// Open storage, wire the components and start background tasks
    pub async fn start(self) -> anyhow::Result<Node> {
        let config = self.config;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Wallet side
        let ledger = Arc::new(match self.ledger_storage {
            Some(storage) => Ledger::with_storage(storage, config.ledger.clone()).await?,
            None => Ledger::open(config.ledger.clone()).await?,
        });

        let mut oracle: Arc<dyn BalanceOracle> = Arc::new(LedgerOracle::new(ledger.clone()));
        if let Some(layer) = self.oracle_layer {
            oracle = layer(oracle);
        }
        let (oracle_client, oracle_server) = oracle_channel(config.oracle_channel_capacity);
        let oracle_server = serve_oracle(oracle_server, oracle);

        let store = open_store(&config.transactions)?;
        let sweeper = HoldSweeper::new(
            ledger.clone(),
            SweeperConfig::from_ledger_config(ledger.config()),
        )
        .with_authority(Arc::new(StoreAuthority::new(store.clone())));
        tasks.push(tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { sweeper.run(shutdown).await }
        }));

        let reconciler = Arc::new(Reconciler::new(ledger.clone(), config.ledger.hold_ttl()));
        tasks.push(tokio::spawn({
            let reconciler = reconciler.clone();
            let interval = config.reconcile_interval();
            let shutdown = shutdown_rx.clone();
            async move { reconciler.run(interval, shutdown).await }
        }));

        // Channel
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => match config.bus.transport {
                TransportKind::Memory => Arc::new(InMemoryTransport::new(config.bus.in_memory())),
                TransportKind::Nats => {
                    Arc::new(JetStreamTransport::connect(config.bus.nats()).await?)
                }
            },
        };
        let publisher = Publisher::new(transport.clone(), PublisherConfig::default());

        let dlq = Arc::new(
            DlqRouter::new(publisher.clone())
                .with_retention_days(config.settlement.dlq_retention_days),
        );
        let consumer = Arc::new(SettlementConsumer::new(
            ledger.clone(),
            dlq,
            config.settlement.clone(),
        ));
        let subscription = consumer.clone().subscribe(transport.clone()).await?;

        // Transaction side
        let metrics = Metrics::new()?;
        let orchestrator = Arc::new(TransferOrchestrator::new(
            store.clone(),
            Arc::new(oracle_client),
            &config.transactions,
            metrics.clone(),
        ));

        let relay = Arc::new(OutboxRelay::new(
            store.clone(),
            publisher,
            config.transactions.outbox.clone(),
            metrics,
        ));
        tasks.push(tokio::spawn({
            let relay = relay.clone();
            let shutdown = shutdown_rx.clone();
            async move { relay.run(shutdown).await }
        }));

        info!(
            transport = ?config.bus.transport,
            balance_policy = ?config.transactions.balance_policy,
            consumer_group = %config.settlement.consumer_group,
            "Node started"
        );

        Ok(Node {
            ledger,
            orchestrator,
            consumer,
            relay,
            reconciler,
            store,
            transport,
            subscription: Some(subscription),
            shutdown,
            tasks,
            oracle_server,
        })
    }
}

/// Running node
pub struct Node {
    ledger: Arc<Ledger>,
    orchestrator: Arc<TransferOrchestrator>,
    consumer: Arc<SettlementConsumer>,
    relay: Arc<OutboxRelay>,
    reconciler: Arc<Reconciler>,
    store: Arc<dyn TransactionStore>,
    transport: Arc<dyn Transport>,
    subscription: Option<Subscription>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    oracle_server: JoinHandle<()>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("ledger", &self.ledger)
            .field("orchestrator", &self.orchestrator)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl Node {
    /// Builder over `config`
    pub fn builder(config: NodeConfig) -> NodeBuilder {
        NodeBuilder {
            config,
            transport: None,
            ledger_storage: None,
            oracle_layer: None,
        }
    }

    /// Start with `config` and nothing overridden
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        Self::builder(config).start().await
    }

    /// Wallet ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Transfer orchestrator
    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    /// Settlement consumer
    pub fn consumer(&self) -> &Arc<SettlementConsumer> {
        &self.consumer
    }

    /// Outbox relay
    pub fn relay(&self) -> &Arc<OutboxRelay> {
        &self.relay
    }

    /// Reconciler
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Transaction ledger
    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Event channel
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Stop background tasks, the consumer and the ledger writer
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        info!("Shutting down node");
        let _ = self.shutdown.send(true);

        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        // the orchestrator still holds a client, so the server would not end on its own
        self.oracle_server.abort();
        self.ledger.shutdown().await?;
        Ok(())
    }
}
