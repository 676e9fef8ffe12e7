//! Credit ledger service host

use anyhow::Context;
use credit_core::{Config, CreditLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting DelTran Credit Server");

    let config = match std::env::var("CREDIT_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    let ledger = CreditLedger::open(config)
        .await
        .context("opening credit ledger")?;

    let packs = ledger.list_packs().await?;
    tracing::info!(packs = packs.len(), "Credit ledger ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down credit server");
    ledger.shutdown().await?;
    Ok(())
}
