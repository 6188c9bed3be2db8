//! HTTP endpoints exposing controller health, readiness, and self-metrics
//!
//! Liveness and readiness are answered from the reconcile-loop health state,
//! so probes reflect whether passes actually complete rather than a flag
//! flipped at startup.

use std::sync::Arc;

use autoscaler_lib::health::ControllerHealth;
use autoscaler_lib::observability::ControllerMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

/// Shared state of the API endpoints
#[derive(Clone)]
pub struct AppState {
    pub health: ControllerHealth,
    pub metrics: ControllerMetrics,
}

impl AppState {
    pub fn new(health: ControllerHealth, metrics: ControllerMetrics) -> Self {
        Self { health, metrics }
    }
}

/// Liveness probe: 200 while the reconcile loop still produces results
/// (including degraded passes), 503 once it is stalled
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;
    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(health))
}

/// Readiness probe: 200 once the caches are synced and the loop is alive
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

/// Prometheus exposition of the controller's own metrics
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
