//! Core data model for autoscaling policies, bindings, and cluster objects

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind string for a whole-workload scaling target
pub const WORKLOAD_KIND: &str = "Workload";

/// Kind string for a single role inside a workload
pub const WORKLOAD_ROLE_KIND: &str = "Workload/Role";

/// Reusable declarative scaling rules bound to targets via a `PolicyBinding`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub name: String,
    pub namespace: String,
    /// Percentage of deviation tolerated before any scaling action.
    /// Scaling happens only when
    /// `|desired - current| >= current * tolerance_percent / 100`.
    #[serde(default = "default_tolerance_percent")]
    pub tolerance_percent: i32,
    /// Metrics evaluated for scaling decisions; must be non-empty.
    pub metrics: Vec<PolicyMetric>,
    #[serde(default)]
    pub behavior: Behavior,
}

/// One metric and the per-instance value it should be driven toward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMetric {
    pub metric_name: String,
    pub target_value: f64,
}

/// Scaling behavior for both directions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Behavior {
    #[serde(default)]
    pub scale_up: ScaleUpPolicy,
    #[serde(default)]
    pub scale_down: StablePolicy,
}

/// Scale-up behavior: a smoothed stable policy plus an emergency panic policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaleUpPolicy {
    #[serde(default)]
    pub stable: StablePolicy,
    #[serde(default)]
    pub panic: PanicPolicy,
}

/// Rate-limit envelope applied to one scaling direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StablePolicy {
    /// Maximum absolute number of instances added or removed per period.
    #[serde(default = "default_stable_instances")]
    pub instances: Option<i32>,
    /// Maximum percentage of current instances added or removed per period.
    #[serde(default = "default_stable_percent")]
    pub percent: Option<i32>,
    /// Window over which the instance/percent budgets apply.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default)]
    pub select_policy: SelectPolicy,
    /// Window of past corrected recommendations consulted to damp
    /// oscillations. Unset means no smoothing.
    #[serde(default)]
    pub stabilization_window_secs: Option<u64>,
}

impl Default for StablePolicy {
    fn default() -> Self {
        Self {
            instances: default_stable_instances(),
            percent: default_stable_percent(),
            period_secs: default_period_secs(),
            select_policy: SelectPolicy::default(),
            stabilization_window_secs: None,
        }
    }
}

impl StablePolicy {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn stabilization_window(&self) -> Duration {
        Duration::from_secs(self.stabilization_window_secs.unwrap_or(0))
    }
}

/// Selection strategy when both instance and percent budgets are configured.
/// `Or` takes the more permissive budget, `And` the more restrictive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectPolicy {
    #[default]
    Or,
    And,
}

/// Emergency scaling policy for sudden traffic surges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanicPolicy {
    /// Maximum percentage of current instances added per period while in
    /// panic mode. The absolute instance budget is unbounded in panic mode.
    #[serde(default = "default_panic_percent")]
    pub percent: i32,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Recommendation-to-current ratio (percent) that triggers panic mode.
    /// Unset disables the panic state machine entirely.
    #[serde(default = "default_panic_threshold_percent")]
    pub panic_threshold_percent: Option<i32>,
    /// How long panic mode is held after the most recent trigger.
    #[serde(default = "default_panic_mode_hold_secs")]
    pub panic_mode_hold_secs: u64,
}

impl Default for PanicPolicy {
    fn default() -> Self {
        Self {
            percent: default_panic_percent(),
            period_secs: default_period_secs(),
            panic_threshold_percent: default_panic_threshold_percent(),
            panic_mode_hold_secs: default_panic_mode_hold_secs(),
        }
    }
}

impl PanicPolicy {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn panic_mode_hold(&self) -> Duration {
        Duration::from_secs(self.panic_mode_hold_secs)
    }
}

fn default_tolerance_percent() -> i32 {
    10
}

fn default_stable_instances() -> Option<i32> {
    Some(1)
}

fn default_stable_percent() -> Option<i32> {
    Some(100)
}

fn default_period_secs() -> u64 {
    15
}

fn default_panic_percent() -> i32 {
    1000
}

fn default_panic_threshold_percent() -> Option<i32> {
    Some(200)
}

fn default_panic_mode_hold_secs() -> u64 {
    60
}

/// Links a scaling policy to concrete workload targets.
///
/// Exactly one of `homogeneous` / `heterogeneous` must be set; bindings
/// violating that are rejected by the admission webhook upstream and are
/// logged and skipped by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub name: String,
    pub namespace: String,
    /// Name of the referenced `ScalingPolicy` in the same namespace.
    pub policy_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homogeneous: Option<HomogeneousSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heterogeneous: Option<HeterogeneousSpec>,
}

/// One identical group of instances scaled as a scalar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomogeneousSpec {
    pub target: Target,
    pub min_replicas: i32,
    pub max_replicas: i32,
}

/// Several backends with distinct costs and bounds serving one workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeterogeneousSpec {
    /// Backends to optimize across; must be non-empty.
    pub params: Vec<BackendParam>,
    /// Percentage rate at which the marginal cost of one backend expands as
    /// it fills. 100 means linear cost (cheapest backend fills completely
    /// before the next one starts).
    #[serde(default = "default_cost_expansion_rate_percent")]
    pub cost_expansion_rate_percent: i32,
}

fn default_cost_expansion_rate_percent() -> i32 {
    200
}

/// One backend of a heterogeneous binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendParam {
    pub target: Target,
    /// Cost of running one replica of this backend.
    #[serde(default)]
    pub cost: i32,
    pub min_replicas: i32,
    pub max_replicas: i32,
}

/// A workload (optionally narrowed to one role) to observe and scale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub target_ref: TargetRef,
    #[serde(default)]
    pub additional_match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub metric_endpoint: MetricEndpoint,
}

/// Reference to the scaled object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// `Workload` or `Workload/Role`. Empty defaults to `Workload`.
    #[serde(default)]
    pub kind: String,
    pub namespace: String,
    /// Object name; for `Workload/Role` targets this is `{parent}/{role}`.
    pub name: String,
}

impl TargetRef {
    /// Kind with the empty-string default applied
    pub fn normalized_kind(&self) -> &str {
        if self.kind.is_empty() {
            WORKLOAD_KIND
        } else {
            &self.kind
        }
    }
}

/// Where instances of a target expose Prometheus metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEndpoint {
    #[serde(default = "default_metric_uri")]
    pub uri: String,
    #[serde(default = "default_metric_port")]
    pub port: u16,
}

impl Default for MetricEndpoint {
    fn default() -> Self {
        Self {
            uri: default_metric_uri(),
            port: default_metric_port(),
        }
    }
}

fn default_metric_uri() -> String {
    "/metrics".to_string()
}

fn default_metric_port() -> u16 {
    8100
}

/// Pod lifecycle phase as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// The slice of pod state the collector needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub ip: String,
    pub phase: PodPhase,
    /// Wall-clock start time; changes when the pod restarts, which
    /// invalidates any histogram baseline recorded for it.
    pub start_time: Option<DateTime<Utc>>,
    /// Whether the `Ready` condition is true.
    pub ready: bool,
    /// Sum of container restart counts.
    #[serde(default)]
    pub restart_count: i32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl PodInfo {
    pub fn is_running_and_ready(&self) -> bool {
        self.phase == PodPhase::Running && self.ready
    }

    pub fn is_failed(&self) -> bool {
        self.phase == PodPhase::Failed
    }

    pub fn container_restarted(&self) -> bool {
        self.restart_count > 0
    }
}

/// Scalable workload object: a scalar replica count plus optional
/// per-role replica counts inside its template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub roles: Vec<WorkloadRole>,
}

/// One role of a workload template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRole {
    pub name: String,
    #[serde(default)]
    pub replicas: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_ref_kind_defaults_to_workload() {
        let target_ref = TargetRef {
            kind: String::new(),
            namespace: "ns".to_string(),
            name: "model-a".to_string(),
        };
        assert_eq!(target_ref.normalized_kind(), WORKLOAD_KIND);

        let role_ref = TargetRef {
            kind: WORKLOAD_ROLE_KIND.to_string(),
            namespace: "ns".to_string(),
            name: "model-a/decode".to_string(),
        };
        assert_eq!(role_ref.normalized_kind(), WORKLOAD_ROLE_KIND);
    }

    #[test]
    fn test_policy_defaults_from_json() {
        let policy: ScalingPolicy = serde_json::from_str(
            r#"{
                "name": "p",
                "namespace": "ns",
                "metrics": [{"metric_name": "load", "target_value": 1.0}]
            }"#,
        )
        .unwrap();

        assert_eq!(policy.tolerance_percent, 10);
        assert_eq!(policy.behavior.scale_up.stable.instances, Some(1));
        assert_eq!(policy.behavior.scale_up.stable.percent, Some(100));
        assert_eq!(policy.behavior.scale_up.stable.select_policy, SelectPolicy::Or);
        assert_eq!(policy.behavior.scale_up.panic.percent, 1000);
        assert_eq!(
            policy.behavior.scale_up.panic.panic_threshold_percent,
            Some(200)
        );
        assert_eq!(
            policy.behavior.scale_up.panic.panic_mode_hold(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_metric_endpoint_defaults() {
        let endpoint = MetricEndpoint::default();
        assert_eq!(endpoint.uri, "/metrics");
        assert_eq!(endpoint.port, 8100);
    }

    #[test]
    fn test_pod_readiness_and_failure() {
        let mut pod = PodInfo {
            name: "pod-a".to_string(),
            namespace: "ns".to_string(),
            ip: "10.0.0.1".to_string(),
            phase: PodPhase::Running,
            start_time: Some(Utc::now()),
            ready: true,
            restart_count: 0,
            labels: BTreeMap::new(),
        };
        assert!(pod.is_running_and_ready());
        assert!(!pod.is_failed());
        assert!(!pod.container_restarted());

        pod.ready = false;
        assert!(!pod.is_running_and_ready());

        pod.phase = PodPhase::Failed;
        assert!(pod.is_failed());

        pod.restart_count = 2;
        assert!(pod.container_restarted());
    }
}
