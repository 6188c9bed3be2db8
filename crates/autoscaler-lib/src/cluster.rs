//! External collaborator interfaces and the in-memory cluster store
//!
//! The core consumes cluster state through narrow traits: pod listing by
//! label selector, policy and binding lookup, and replica reads/writes at
//! workload or role granularity. `ClusterStore` is the concurrent in-memory
//! implementation used by the controller binary and tests; informer-backed
//! implementations live with the surrounding control plane.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::models::{
    PodInfo, PolicyBinding, ScalingPolicy, Target, TargetRef, Workload, WORKLOAD_KIND,
    WORKLOAD_ROLE_KIND,
};

/// Label carrying the workload name on its pods
pub const WORKLOAD_NAME_LABEL_KEY: &str = "serving.io/workload-name";

/// Label marking the entry pod of an instance group
pub const ENTRY_LABEL_KEY: &str = "serving.io/entry";

/// Label carrying the role name on role pods
pub const ROLE_LABEL_KEY: &str = "serving.io/role";

pub const ENTRY_LABEL_VALUE: &str = "true";

/// Split a `Workload/Role` target name into `(workload, role)`
pub fn parse_role_name(target_ref: &TargetRef) -> Result<(String, String)> {
    let parts: Vec<&str> = target_ref.name.split('/').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        bail!("invalid workload role name: {}", target_ref.name);
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Build the pod label selector for a target.
///
/// `Workload` targets select `{workload-name, entry}` plus any additional
/// labels; `Workload/Role` targets additionally pin the role label.
pub fn target_labels(target: &Target) -> Result<BTreeMap<String, String>> {
    let mut labels = target.additional_match_labels.clone();
    match target.target_ref.normalized_kind() {
        WORKLOAD_KIND => {
            labels.insert(
                WORKLOAD_NAME_LABEL_KEY.to_string(),
                target.target_ref.name.clone(),
            );
            labels.insert(ENTRY_LABEL_KEY.to_string(), ENTRY_LABEL_VALUE.to_string());
        }
        WORKLOAD_ROLE_KIND => {
            let (workload_name, role_name) = parse_role_name(&target.target_ref)?;
            labels.insert(WORKLOAD_NAME_LABEL_KEY.to_string(), workload_name);
            labels.insert(ENTRY_LABEL_KEY.to_string(), ENTRY_LABEL_VALUE.to_string());
            labels.insert(ROLE_LABEL_KEY.to_string(), role_name);
        }
        other => bail!("unsupported target kind: {}", other),
    }
    Ok(labels)
}

/// Lists pods matching a label selector in a namespace
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>>;

    /// Whether the backing cache has completed its initial sync.
    fn has_synced(&self) -> bool;
}

/// Looks up scaling policies by name
#[async_trait]
pub trait PolicyLister: Send + Sync {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<ScalingPolicy>>;

    fn has_synced(&self) -> bool;
}

/// Lists policy bindings in a namespace
#[async_trait]
pub trait BindingLister: Send + Sync {
    async fn list_bindings(&self, namespace: &str) -> Result<Vec<PolicyBinding>>;

    fn has_synced(&self) -> bool;
}

/// Reads and writes replica counts of workloads, at workload or role
/// granularity depending on the target kind
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    async fn get_replicas(&self, target_ref: &TargetRef) -> Result<i32>;

    async fn set_replicas(&self, target_ref: &TargetRef, replicas: i32) -> Result<()>;

    fn has_synced(&self) -> bool;
}

/// Concurrent in-memory registry of cluster objects, keyed by
/// `namespace/name`
#[derive(Debug, Default)]
pub struct ClusterStore {
    pods: DashMap<String, PodInfo>,
    workloads: DashMap<String, Workload>,
    policies: DashMap<String, ScalingPolicy>,
    bindings: DashMap<String, PolicyBinding>,
    /// Number of replica writes, for observability and tests.
    replica_writes: AtomicU64,
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_pod(&self, pod: PodInfo) {
        self.pods.insert(object_key(&pod.namespace, &pod.name), pod);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        self.pods.remove(&object_key(namespace, name)).map(|(_, v)| v)
    }

    pub fn upsert_workload(&self, workload: Workload) {
        self.workloads
            .insert(object_key(&workload.namespace, &workload.name), workload);
    }

    pub fn get_workload(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.workloads
            .get(&object_key(namespace, name))
            .map(|w| w.clone())
    }

    pub fn upsert_policy(&self, policy: ScalingPolicy) {
        self.policies
            .insert(object_key(&policy.namespace, &policy.name), policy);
    }

    pub fn upsert_binding(&self, binding: PolicyBinding) {
        self.bindings
            .insert(object_key(&binding.namespace, &binding.name), binding);
    }

    pub fn remove_binding(&self, namespace: &str, name: &str) -> Option<PolicyBinding> {
        self.bindings
            .remove(&object_key(namespace, name))
            .map(|(_, v)| v)
    }

    /// Total replica writes applied through the workload client
    pub fn replica_write_count(&self) -> u64 {
        self.replica_writes.load(Ordering::Relaxed)
    }

    fn workload_for(&self, target_ref: &TargetRef) -> Result<(String, Workload)> {
        let workload_name = match target_ref.normalized_kind() {
            WORKLOAD_KIND => target_ref.name.clone(),
            WORKLOAD_ROLE_KIND => parse_role_name(target_ref)?.0,
            other => bail!("unsupported target kind: {}", other),
        };
        let key = object_key(&target_ref.namespace, &workload_name);
        let workload = self
            .workloads
            .get(&key)
            .map(|w| w.clone())
            .with_context(|| format!("workload {} not found", key))?;
        Ok((key, workload))
    }
}

#[async_trait]
impl PodLister for ClusterStore {
    async fn list_pods(
        &self,
        namespace: &str,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<PodInfo>> {
        let pods = self
            .pods
            .iter()
            .filter(|entry| {
                let pod = entry.value();
                pod.namespace == namespace && labels_match(&pod.labels, match_labels)
            })
            .map(|entry| entry.value().clone())
            .collect();
        Ok(pods)
    }

    fn has_synced(&self) -> bool {
        true
    }
}

#[async_trait]
impl PolicyLister for ClusterStore {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<Option<ScalingPolicy>> {
        Ok(self
            .policies
            .get(&object_key(namespace, name))
            .map(|p| p.clone()))
    }

    fn has_synced(&self) -> bool {
        true
    }
}

#[async_trait]
impl BindingLister for ClusterStore {
    async fn list_bindings(&self, namespace: &str) -> Result<Vec<PolicyBinding>> {
        let mut bindings: Vec<PolicyBinding> = self
            .bindings
            .iter()
            .filter(|entry| entry.value().namespace == namespace)
            .map(|entry| entry.value().clone())
            .collect();
        // Deterministic reconcile order.
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(bindings)
    }

    fn has_synced(&self) -> bool {
        true
    }
}

#[async_trait]
impl WorkloadClient for ClusterStore {
    async fn get_replicas(&self, target_ref: &TargetRef) -> Result<i32> {
        let (_, workload) = self.workload_for(target_ref)?;
        match target_ref.normalized_kind() {
            WORKLOAD_KIND => workload
                .replicas
                .with_context(|| format!("workload {} has no replica count", workload.name)),
            WORKLOAD_ROLE_KIND => {
                let (_, role_name) = parse_role_name(target_ref)?;
                let role = workload
                    .roles
                    .iter()
                    .find(|r| r.name == role_name)
                    .with_context(|| {
                        format!("role {} not found in workload {}", role_name, workload.name)
                    })?;
                role.replicas.with_context(|| {
                    format!("role {} has no replica count", role_name)
                })
            }
            other => bail!("unsupported target kind: {}", other),
        }
    }

    async fn set_replicas(&self, target_ref: &TargetRef, replicas: i32) -> Result<()> {
        let (key, mut workload) = self.workload_for(target_ref)?;
        match target_ref.normalized_kind() {
            WORKLOAD_KIND => {
                if workload.replicas == Some(replicas) {
                    debug!(workload = %workload.name, replicas, "replica count already current");
                    return Ok(());
                }
                workload.replicas = Some(replicas);
            }
            WORKLOAD_ROLE_KIND => {
                let (_, role_name) = parse_role_name(target_ref)?;
                let role = workload
                    .roles
                    .iter_mut()
                    .find(|r| r.name == role_name)
                    .with_context(|| {
                        format!("role {} not found in workload {}", role_name, workload.name)
                    })?;
                if role.replicas == Some(replicas) {
                    debug!(workload = %workload.name, role = %role_name, replicas, "replica count already current");
                    return Ok(());
                }
                role.replicas = Some(replicas);
            }
            other => bail!("unsupported target kind: {}", other),
        }
        self.workloads.insert(key, workload);
        self.replica_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn has_synced(&self) -> bool {
        true
    }
}

fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// All selector labels must be present with equal values on the pod
fn labels_match(pod_labels: &BTreeMap<String, String>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| pod_labels.get(key) == Some(value))
}
