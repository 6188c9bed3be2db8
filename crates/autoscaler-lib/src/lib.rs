//! Autoscaling core for a model-serving control plane
//!
//! This crate provides the core functionality for:
//! - Metric collection from serving pods (Prometheus text exposition)
//! - Histogram snapshots and quantile-over-diff latency signals
//! - Replica recommendation and correction (stabilization, panic mode,
//!   rate limits)
//! - Homogeneous scaling and heterogeneous cost-aware optimization
//! - Periodic reconciliation of policy bindings
//! - Health checks and observability

pub mod algorithm;
pub mod cluster;
pub mod collector;
pub mod health;
pub mod histogram;
pub mod models;
pub mod observability;
pub mod optimizer;
pub mod reconciler;
pub mod scaler;

pub use health::{
    ComponentHealth, ComponentStatus, ControllerHealth, HealthResponse, PassSummary,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use reconciler::{Reconciler, ReconcilerConfig};
