//! Ledger server binary
//!
//! Opens the ledger and keeps the leaderboard refresher running until ctrl-c. The RPC
//! transport mounts on top of [`Ledger`] and is wired in by the deployment.

use anyhow::Context;
use ipcoin_ledger::{Config, Ledger};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("IPCOIN_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        grpc = %config.grpc_listen_addr,
        "Starting IPCoin ledger server"
    );

    // Open ledger
    let ledger = Ledger::open(config)
        .await
        .context("failed to open ledger")?;

    let stats = ledger.stats().context("failed to read storage stats")?;
    tracing::info!(
        transfers = stats.total_transfers,
        comments = stats.total_comments,
        leaderboard_entries = ledger.get_leaderboard().by_balance.len(),
        "Ledger ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await;
    Ok(())
}
