//! Autoscale controller - replica autoscaling for model-serving workloads
//!
//! This binary runs the periodic reconcile loop that drives workloads
//! toward their recommended replica counts, plus an HTTP endpoint for
//! health checks and self-metrics.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autoscale_controller::{api, config};
use autoscaler_lib::{
    cluster::ClusterStore,
    health::ControllerHealth,
    observability::{ControllerMetrics, StructuredLogger},
    reconciler::Reconciler,
};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting autoscale-controller");

    // Load configuration
    let config = config::ControllerConfig::load()?;
    info!(namespace = %config.namespace, "Controller configured");

    // Health is derived from reconcile-loop progress at this cadence
    let health = ControllerHealth::new(Duration::from_secs(config.reconcile_interval_secs));

    // Initialize metrics
    let metrics = ControllerMetrics::new();

    // Initialize structured logger
    let logger = StructuredLogger::new(&config.namespace);
    logger.log_startup(CONTROLLER_VERSION);

    // Cluster state store, fed by the surrounding control plane
    let store = Arc::new(ClusterStore::new());

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health.clone(), metrics.clone()));

    // Start the reconcile loop; it reports cache sync and pass outcomes
    // into the health state the probes answer from
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = Reconciler::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        config.reconciler_config(),
        metrics.clone(),
        logger.clone(),
        health.clone(),
    );
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx));

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    let _ = reconciler_handle.await;
    api_handle.abort();

    Ok(())
}
