//! Ledger HTTP server binary

use anyhow::Result;
use std::sync::Arc;
use transfer_ledger::{api, Config, Ledger};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("starting transfer ledger server");

    // Load configuration: file when LEDGER_CONFIG points at one, environment otherwise
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::from_env()?,
    };
    let listen_addr = config.listen_addr.clone();

    let ledger = Arc::new(Ledger::open(config)?);
    tracing::info!("ledger opened successfully");

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(%listen_addr, "listening");

    axum::serve(listener, api::router(ledger.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down ledger server");
    if let Ok(ledger) = Arc::try_unwrap(ledger) {
        ledger.shutdown()?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install shutdown handler");
    }
}
