//! Controller health derived from reconcile-loop behavior
//!
//! Liveness and readiness are computed from what the controller actually
//! does rather than from manually flipped flags: whether the backing caches
//! have synced, how the most recent reconcile pass went (binding errors,
//! bindings without a metric signal, pass timeout), and whether a pass has
//! completed recently at all. A loop that has not finished a pass within a
//! few reconcile intervals is considered stalled and reported unhealthy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A pass is considered stalled after this many missed intervals
const STALL_INTERVALS: u32 = 3;

/// Health status of a controller concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Working as expected
    Healthy,
    /// Producing results with failures mixed in
    Degraded,
    /// Not producing results
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the concern still produces results
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }

    fn worst(self, other: ComponentStatus) -> ComponentStatus {
        use ComponentStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Status of one controller concern with a human-readable cause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
        }
    }

    fn degraded(message: String) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message),
        }
    }

    fn unhealthy(message: String) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
    /// Seconds since the last completed reconcile pass, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pass_age_secs: Option<u64>,
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Names of the tracked controller concerns
pub mod components {
    pub const RECONCILE_LOOP: &str = "reconcile_loop";
    pub const CLUSTER_CACHE: &str = "cluster_cache";
}

/// Outcome counts of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Bindings listed in the pass.
    pub bindings: usize,
    /// Bindings whose cycle failed with an error.
    pub errors: usize,
    /// Bindings that produced no usable metric signal (failed scrapes,
    /// unready or missing pods).
    pub no_signal: usize,
}

#[derive(Debug)]
struct PassRecord {
    finished_at: Instant,
    summary: PassSummary,
    timed_out: bool,
}

#[derive(Debug, Default)]
struct HealthState {
    caches_synced: bool,
    loop_started: Option<Instant>,
    last_pass: Option<PassRecord>,
}

/// Tracks controller liveness and readiness from reconcile-loop events.
///
/// The reconciler reports cache sync, pass completions, and pass timeouts;
/// health and readiness responses are derived on demand. Clones share the
/// same state.
#[derive(Debug, Clone)]
pub struct ControllerHealth {
    state: Arc<RwLock<HealthState>>,
    /// The loop is expected to complete one pass per interval.
    reconcile_interval: Duration,
}

impl ControllerHealth {
    pub fn new(reconcile_interval: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState::default())),
            reconcile_interval,
        }
    }

    fn stall_after(&self) -> Duration {
        self.reconcile_interval * STALL_INTERVALS
    }

    /// Record that the reconcile loop has started running
    pub async fn mark_loop_started(&self) {
        let mut state = self.state.write().await;
        if state.loop_started.is_none() {
            state.loop_started = Some(Instant::now());
        }
    }

    /// Record that all backing caches completed their initial sync
    pub async fn mark_caches_synced(&self) {
        let mut state = self.state.write().await;
        state.caches_synced = true;
    }

    /// Record a completed reconcile pass
    pub async fn record_pass(&self, summary: PassSummary) {
        let mut state = self.state.write().await;
        state.last_pass = Some(PassRecord {
            finished_at: Instant::now(),
            summary,
            timed_out: false,
        });
    }

    /// Record a reconcile pass that hit the pass timeout
    pub async fn record_pass_timeout(&self) {
        let mut state = self.state.write().await;
        state.last_pass = Some(PassRecord {
            finished_at: Instant::now(),
            summary: PassSummary::default(),
            timed_out: true,
        });
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;

        let cache = if state.caches_synced {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::degraded("caches not yet synced".to_string())
        };

        let reconcile_loop = self.reconcile_loop_health(&state);
        let status = cache.status.worst(reconcile_loop.status);
        let last_pass_age_secs = state
            .last_pass
            .as_ref()
            .map(|pass| pass.finished_at.elapsed().as_secs());

        let mut components = HashMap::new();
        components.insert(components::CLUSTER_CACHE.to_string(), cache);
        components.insert(components::RECONCILE_LOOP.to_string(), reconcile_loop);

        HealthResponse {
            status,
            components,
            last_pass_age_secs,
        }
    }

    fn reconcile_loop_health(&self, state: &HealthState) -> ComponentHealth {
        let stall_after = self.stall_after();
        match &state.last_pass {
            Some(pass) => {
                let age = pass.finished_at.elapsed();
                if age > stall_after {
                    return ComponentHealth::unhealthy(format!(
                        "no reconcile pass completed in the last {}s",
                        age.as_secs()
                    ));
                }
                if pass.timed_out {
                    return ComponentHealth::degraded(
                        "last reconcile pass exceeded its timeout".to_string(),
                    );
                }
                if pass.summary.errors > 0 {
                    if pass.summary.bindings == 0 {
                        return ComponentHealth::degraded(
                            "binding listing failed in the last pass".to_string(),
                        );
                    }
                    return ComponentHealth::degraded(format!(
                        "{} of {} bindings failed in the last pass",
                        pass.summary.errors, pass.summary.bindings
                    ));
                }
                if pass.summary.no_signal > 0 {
                    return ComponentHealth::degraded(format!(
                        "{} of {} bindings produced no metric signal",
                        pass.summary.no_signal, pass.summary.bindings
                    ));
                }
                ComponentHealth::healthy()
            }
            None => match state.loop_started {
                Some(started) if started.elapsed() > stall_after => {
                    ComponentHealth::unhealthy(
                        "first reconcile pass has not completed".to_string(),
                    )
                }
                _ => ComponentHealth {
                    status: ComponentStatus::Healthy,
                    message: Some("waiting for the first reconcile pass".to_string()),
                },
            },
        }
    }

    /// Get readiness response; the controller serves once caches are synced
    /// and the reconcile loop is not stalled
    pub async fn readiness(&self) -> ReadinessResponse {
        let health = self.health().await;
        let state = self.state.read().await;

        if !state.caches_synced {
            return ReadinessResponse {
                ready: false,
                reason: Some("caches not yet synced".to_string()),
            };
        }
        if health.status == ComponentStatus::Unhealthy {
            return ReadinessResponse {
                ready: false,
                reason: Some("reconcile loop stalled".to_string()),
            };
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
