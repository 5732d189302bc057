//! Chamaledger service entry point.
//!
//! Wires config, storage, the event bus, and the scheduled batch jobs. The
//! API layer (out of scope here) constructs the same engines against the
//! shared store; this binary keeps the derived fields fresh and logs domain
//! events as they commit.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chamaledger::batch::spawn_batch_jobs;
use chamaledger::config::Config;
use chamaledger::events::EventBus;
use chamaledger::ledger::LedgerStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!(db = %config.database_path, "starting chamaledger");

    let store = Arc::new(
        LedgerStore::new(&config.database_path, config.lock_timeout())
            .context("open ledger store")?,
    );
    let events = EventBus::default();

    // Log every committed domain event; the notification layer subscribes
    // the same way.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => info!(event_id = %event.event_id, "event: {:?}", event.kind),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    info!(skipped = n, "event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let jobs = spawn_batch_jobs(store, &config);

    tokio::signal::ctrl_c().await.context("wait for shutdown signal")?;
    info!("shutting down");
    for job in jobs {
        job.abort();
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chamaledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
