use anyhow::{Context, Result};
use fin_market_maker::{ManagementServer, ShutdownCoordinator};
use notify::{LoggerSink, NotificationSink, TelegramSink};
use orchestrator::Orchestrator;
use shared::config::AppConfig;
use shared::metrics::HealthMetrics;
use std::sync::Arc;
use std::time::Duration;
use store::{JsonFileStore, MemoryStore, Store};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use venue::{RestVenue, VenueClient};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    tracing::info!("starting fin market maker");

    let config = AppConfig::load()?;
    tracing::info!(
        wallets = config.wallets.len(),
        contracts = config.contracts.len(),
        ?config.binding,
        "configuration loaded"
    );

    let metrics = HealthMetrics::new();
    let store = build_store(&config)?;
    let sink = build_sink(&config);
    let venue = build_venue(&config)?;

    let orchestrator =
        Orchestrator::bootstrap(&config, venue, store, sink, Arc::clone(&metrics)).await?;
    let orchestrator_handle = Arc::clone(&orchestrator).spawn();

    let server = ManagementServer::new(
        config.binding.as_deref(),
        Arc::clone(&orchestrator),
        Arc::clone(&metrics),
    )?;
    let (_addr, server_handle) = server.spawn().await?;

    signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    let coordinator = ShutdownCoordinator::new(
        &config.shutdown,
        orchestrator,
        orchestrator_handle,
        metrics,
    );
    coordinator.shutdown().await?;
    server_handle.abort();
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    match &config.store.data_dir {
        Some(dir) => Ok(Arc::new(JsonFileStore::new(dir)?)),
        None => {
            tracing::warn!("no store.data_dir configured, records are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_sink(config: &AppConfig) -> Arc<dyn NotificationSink> {
    let token = std::env::var(&config.notify.token_env).ok();
    match (token, config.notify.chat_id.clone()) {
        (Some(token), Some(chat_id)) => {
            tracing::info!("telegram notifications enabled");
            Arc::new(TelegramSink::new(token, chat_id))
        }
        _ => Arc::new(LoggerSink),
    }
}

fn build_venue(config: &AppConfig) -> Result<VenueClient> {
    let endpoint = config
        .venue
        .endpoint
        .clone()
        .context("venue.endpoint is required")?;
    let token = config.venue.token()?;
    let backend = RestVenue::new(
        endpoint,
        token,
        Duration::from_millis(config.venue.request_timeout_ms()),
    )?;
    Ok(VenueClient::with_backend(backend))
}
