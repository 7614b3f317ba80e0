//! Skyforge gateway — natural-language infrastructure commands with
//! previewed, versioned, rolled-back-on-failure execution and an
//! append-only event log.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use sf_gateway::classifier;
use sf_gateway::config::GatewayConfig;
use sf_gateway::routes;
use sf_gateway::state::{self, AppState};
use sf_gateway::store::{Ledger, PgStore, StateStore, postgres};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sf-gateway starting");

    // Config file as first argument, otherwise environment variables.
    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => GatewayConfig::from_env().context("reading config from environment")?,
    };

    let state = if let Some(database_url) = &config.database_url {
        tracing::info!("connecting to PostgreSQL");
        let pool = postgres::connect(database_url).await?;
        let store = PgStore::new(pool);
        let seeded = store.seed_if_empty(state::sample_resources()).await?;
        if seeded > 0 {
            tracing::info!(resources = seeded, "seeded empty store with sample resources");
        }
        let known: Vec<_> = store.snapshot().await?.iter().cloned().collect();
        let providers = state::provider_registry(&config, &known)?;
        let ledger: Arc<dyn Ledger> = Arc::new(store);
        let classifier = classifier::from_config(&config.ollama);
        AppState::build(ledger, providers, classifier, config)
    } else {
        tracing::warn!("DATABASE_URL not set, using in-memory state with sample data");
        let resources = state::sample_resources();
        let providers = state::provider_registry(&config, &resources)?;
        let ledger: Arc<dyn Ledger> =
            Arc::new(sf_gateway::store::MemoryStore::seeded(resources));
        let classifier = classifier::from_config(&config.ollama);
        AppState::build(ledger, providers, classifier, config)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = state.spawn_background(&shutdown_rx);

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = routes::build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    // Let in-flight scans and polls finish.
    let _ = shutdown_tx.send(true);
    for task in background {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }

    tracing::info!("sf-gateway stopped");
    Ok(())
}
