//! Transfer rail node binary
//!
//! Starts both sides of the rail in one process. Without configured seed
//! accounts it opens two demo accounts and runs one demo transfer.

use node::{demo_seed_accounts, Node, NodeConfig};
use protocol::TransferRequest;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting transfer rail node");

    let mut config = NodeConfig::from_env()?;
    let demo = config.ledger.seed_accounts.is_empty();
    if demo {
        config.ledger.seed_accounts = demo_seed_accounts();
    }
    let seeds = config.ledger.seed_accounts.clone();

    let node = Node::start(config).await?;

    if demo {
        let (alice, bob) = (&seeds[0], &seeds[1]);
        tracing::info!(
            alice = %alice.account_id,
            bob = %bob.account_id,
            "Demo accounts opened"
        );

        match node
            .orchestrator()
            .transfer(TransferRequest::new(
                alice.account_id,
                bob.account_id,
                Decimal::new(10_000, 2),
            ))
            .await
        {
            Ok(record) => tracing::info!(transfer_id = %record.id, status = %record.status, "Demo transfer accepted"),
            Err(e) => tracing::warn!(code = e.code(), error = %e, "Demo transfer rejected"),
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        for seed in &seeds {
            if let Some(account) = node.ledger().account(&seed.account_id)? {
                tracing::info!(
                    label = seed.label.as_deref().unwrap_or("-"),
                    account_id = %account.account_id,
                    balance = %account.balance,
                    "Demo balance"
                );
            }
        }
    }

    tokio::signal::ctrl_c().await?;

    node.shutdown().await?;
    tracing::info!("Transfer rail node stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("RAIL_LOG_JSON").map(|v| v == "1").unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
