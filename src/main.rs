//! vantage-monitor server entry point.
//!
//! Wires the store, artifact store, imagery provider and orchestrator,
//! starts the sweep loop and serves the REST and WebSocket endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vantage_monitor::api;
use vantage_monitor::app_state::AppState;
use vantage_monitor::artifacts::LocalArtifactStore;
use vantage_monitor::config::MonitorConfig;
use vantage_monitor::domain::EventBus;
use vantage_monitor::persistence::{InMemoryPersistence, Persistence, PostgresPersistence};
use vantage_monitor::provider::SentinelHubProvider;
use vantage_monitor::service::MonitoringOrchestrator;
use vantage_monitor::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config =
        MonitorConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    init_tracing(config.log_json);
    tracing::info!(addr = %config.listen_addr, "starting vantage-monitor");

    let store: Arc<dyn Persistence> = if config.persistence_enabled {
        let postgres = PostgresPersistence::connect(
            &config.database_url,
            config.database_max_connections,
            config.database_min_connections,
            Duration::from_secs(config.database_connect_timeout_secs),
        )
        .await
        .context("connecting to PostgreSQL")?;
        postgres.migrate().await.context("applying migrations")?;
        Arc::new(postgres)
    } else {
        tracing::warn!("persistence disabled, state lives in memory");
        Arc::new(InMemoryPersistence::new())
    };

    let artifacts = LocalArtifactStore::open(&config.artifacts_dir)
        .await
        .with_context(|| format!("opening artifact store {}", config.artifacts_dir.display()))?;
    let provider =
        SentinelHubProvider::new(config.provider.clone()).context("building imagery provider")?;
    if !provider.has_credentials() {
        tracing::warn!("no Sentinel Hub credentials configured, acquisitions will fail");
    }

    let event_bus = EventBus::new(config.event_bus_capacity);
    let orchestrator = Arc::new(MonitoringOrchestrator::new(
        Arc::clone(&store),
        Arc::new(provider),
        Arc::new(artifacts),
        event_bus,
        config.scheduler,
        config.executor,
    ));
    if config.scheduler_autostart {
        orchestrator.start();
    }

    let app_state = AppState::new(Arc::clone(&orchestrator), store);
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
