//! Context Collector - cluster context graph service
//!
//! Periodically pulls resource metadata from the Kubernetes API and the
//! per-node agents, infers the relations between resources, and serves the
//! resulting graph over HTTP.

use anyhow::{Context, Result};
use collector_lib::{
    api::{self, AppState},
    fetch::{ControlPlaneSource, FetchMode, HttpNodeAgents, NodeAgentSource},
    sources::SourceRegistry,
    GraphQuery, HealthRegistry, RefreshLoopBuilder, StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{CollectorConfig, Mode};

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting context-collector");

    let config = CollectorConfig::load()?;
    info!(
        node_name = %config.node_name,
        mode = config.mode.as_str(),
        "Collector configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(COLLECTOR_VERSION, config.mode.as_str());

    let mode = build_mode(&config).await?;
    let sources = Arc::new(SourceRegistry::new());

    let refresh = RefreshLoopBuilder::new()
        .mode(mode)
        .config(config.engine_config())
        .health(health_registry.clone())
        .sources(sources.clone())
        .node_name(&config.node_name)
        .build()?;

    let app_state = Arc::new(AppState::new(
        GraphQuery::new(refresh.publisher()),
        health_registry,
        sources,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let refresh_handle = tokio::spawn(refresh.run(shutdown_rx));

    // Start graph, health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server stopped"),
                Ok(Err(e)) => warn!(error = %e, "API server failed"),
                Err(e) => warn!(error = %e, "API server task panicked"),
            }
            logger.log_shutdown("API server exited");
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = refresh_handle.await {
        warn!(error = %e, "Refresh loop did not stop cleanly");
    }
    info!("Shutting down");

    Ok(())
}

/// Wire the adapters for the configured mode
async fn build_mode(config: &CollectorConfig) -> Result<FetchMode> {
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    match config.mode {
        Mode::Cluster => {
            let control_plane = ControlPlaneSource::connect()
                .await
                .context("Failed to connect to the Kubernetes API")?;
            Ok(FetchMode::Cluster {
                control_plane: Arc::new(control_plane),
                agents: Arc::new(HttpNodeAgents::new(&config.agent_url_template, client)),
            })
        }
        Mode::Local => {
            let agent = NodeAgentSource::new(&config.node_name, &config.local_agent_url, client)
                .context("Invalid local agent URL")?;
            Ok(FetchMode::Local {
                agent: Arc::new(agent),
            })
        }
    }
}
