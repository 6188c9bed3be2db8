//! Observability infrastructure for the autoscale controller
//!
//! Provides:
//! - Prometheus self-metrics (reconcile latency, decision gauges, panic
//!   state, error counters)
//! - Structured JSON logging of scaling decisions via tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::scaler::ScaleDecision;

/// Histogram buckets for reconcile pass latency (in seconds)
const RECONCILE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    reconcile_latency_seconds: Histogram,
    reconcile_errors_total: IntCounter,
    scalers_active: IntGauge,
    optimizers_active: IntGauge,
    recommended_replicas: GaugeVec,
    corrected_replicas: GaugeVec,
    panic_mode: GaugeVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_latency_seconds: register_histogram!(
                "autoscale_controller_reconcile_latency_seconds",
                "Time spent on one reconcile pass over all bindings",
                RECONCILE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            reconcile_errors_total: register_int_counter!(
                "autoscale_controller_reconcile_errors_total",
                "Total number of reconcile errors"
            )
            .expect("Failed to register reconcile_errors_total"),

            scalers_active: register_int_gauge!(
                "autoscale_controller_scalers_active",
                "Number of live homogeneous scalers"
            )
            .expect("Failed to register scalers_active"),

            optimizers_active: register_int_gauge!(
                "autoscale_controller_optimizers_active",
                "Number of live heterogeneous optimizers"
            )
            .expect("Failed to register optimizers_active"),

            recommended_replicas: register_gauge_vec!(
                "autoscale_controller_recommended_replicas",
                "Raw recommended replica count before correction",
                &["binding"]
            )
            .expect("Failed to register recommended_replicas"),

            corrected_replicas: register_gauge_vec!(
                "autoscale_controller_corrected_replicas",
                "Corrected replica count after smoothing and rate limits",
                &["binding"]
            )
            .expect("Failed to register corrected_replicas"),

            panic_mode: register_gauge_vec!(
                "autoscale_controller_panic_mode",
                "Whether the binding is currently in panic mode",
                &["binding"]
            )
            .expect("Failed to register panic_mode"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the duration of one reconcile pass
    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner().reconcile_latency_seconds.observe(duration_secs);
    }

    /// Increment the reconcile error counter
    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors_total.inc();
    }

    /// Update the live scaler/optimizer gauges
    pub fn set_active(&self, scalers: i64, optimizers: i64) {
        self.inner().scalers_active.set(scalers);
        self.inner().optimizers_active.set(optimizers);
    }

    /// Export one scaling decision for a binding
    pub fn observe_decision(&self, binding: &str, decision: ScaleDecision) {
        self.inner()
            .recommended_replicas
            .with_label_values(&[binding])
            .set(decision.recommended as f64);
        self.inner()
            .corrected_replicas
            .with_label_values(&[binding])
            .set(decision.corrected as f64);
        self.inner()
            .panic_mode
            .with_label_values(&[binding])
            .set(if decision.panic { 1.0 } else { 0.0 });
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for scaling decisions,
/// replica writes, and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Log a scaling decision, panic-mode decisions at warn level
    pub fn log_scale_decision(
        &self,
        binding: &str,
        target: &str,
        current_instances: i32,
        decision: ScaleDecision,
    ) {
        if decision.panic {
            warn!(
                event = "scale_decision",
                namespace = %self.namespace,
                binding = %binding,
                target = %target,
                current_instances,
                recommended_instances = decision.recommended,
                corrected_instances = decision.corrected,
                panic = true,
                "Scaling decision made in panic mode"
            );
        } else {
            info!(
                event = "scale_decision",
                namespace = %self.namespace,
                binding = %binding,
                target = %target,
                current_instances,
                recommended_instances = decision.recommended,
                corrected_instances = decision.corrected,
                panic = false,
                "Scaling decision made"
            );
        }
    }

    /// Log a replica count write
    pub fn log_replicas_updated(&self, binding: &str, target: &str, from: i32, to: i32) {
        info!(
            event = "replicas_updated",
            namespace = %self.namespace,
            binding = %binding,
            target = %target,
            from,
            to,
            "Updated target replicas"
        );
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            namespace = %self.namespace,
            controller_version = %version,
            "Autoscale controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Autoscale controller shutting down"
        );
    }
}
