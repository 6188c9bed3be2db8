//! Periodic reconciliation of policy bindings
//!
//! The reconciler waits for the backing caches to sync, then runs one pass
//! per interval under a pass timeout. A pass lists all bindings in the
//! watched namespace, garbage-collects scaler/optimizer state whose binding
//! disappeared or changed mode, and drives every remaining binding through
//! collect, recommend, correct, and the replica write. Bindings are
//! processed sequentially; a failing binding is logged and retried on the
//! next tick without back-off.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::algorithm::Metrics;
use crate::cluster::{BindingLister, PodLister, PolicyLister, WorkloadClient};
use crate::collector::CollectorConfig;
use crate::health::{ControllerHealth, PassSummary};
use crate::models::{
    HeterogeneousSpec, HomogeneousSpec, PolicyBinding, ScalingPolicy, TargetRef,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::optimizer::Optimizer;
use crate::scaler::Autoscaler;

/// Default interval between reconcile passes
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(15);

/// Default timeout for one reconcile pass
pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconciler tunables
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Namespace whose bindings are reconciled.
    pub namespace: String,
    pub interval: Duration,
    pub pass_timeout: Duration,
    pub collector: CollectorConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            interval: DEFAULT_RECONCILE_INTERVAL,
            pass_timeout: DEFAULT_PASS_TIMEOUT,
            collector: CollectorConfig::default(),
        }
    }
}

/// What one binding's cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingOutcome {
    /// A decision was computed (written or confirmed unchanged).
    Completed,
    /// The cycle produced no usable metric signal.
    NoSignal,
    /// The binding was skipped for a configuration problem.
    Skipped,
}

/// Owns the per-binding scalers and optimizers and drives them periodically
pub struct Reconciler {
    policies: Arc<dyn PolicyLister>,
    bindings: Arc<dyn BindingLister>,
    pods: Arc<dyn PodLister>,
    workloads: Arc<dyn WorkloadClient>,
    scalers: HashMap<String, Autoscaler>,
    optimizers: HashMap<String, Optimizer>,
    config: ReconcilerConfig,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    health: ControllerHealth,
}

impl Reconciler {
    pub fn new(
        policies: Arc<dyn PolicyLister>,
        bindings: Arc<dyn BindingLister>,
        pods: Arc<dyn PodLister>,
        workloads: Arc<dyn WorkloadClient>,
        config: ReconcilerConfig,
        metrics: ControllerMetrics,
        logger: StructuredLogger,
        health: ControllerHealth,
    ) -> Self {
        Self {
            policies,
            bindings,
            pods,
            workloads,
            scalers: HashMap::new(),
            optimizers: HashMap::new(),
            config,
            metrics,
            logger,
            health,
        }
    }

    /// Number of live homogeneous scalers
    pub fn scaler_count(&self) -> usize {
        self.scalers.len()
    }

    /// Number of live heterogeneous optimizers
    pub fn optimizer_count(&self) -> usize {
        self.optimizers.len()
    }

    /// Block until all backing caches report synced
    pub async fn wait_for_cache_sync(&self) {
        loop {
            if self.policies.has_synced()
                && self.bindings.has_synced()
                && self.pods.has_synced()
                && self.workloads.has_synced()
            {
                info!("caches synced");
                self.health.mark_caches_synced().await;
                return;
            }
            debug!("waiting for caches to sync");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Run the reconcile loop until shutdown.
    ///
    /// A tick is deferred while the previous pass is still running, so two
    /// passes never overlap.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        self.health.mark_loop_started().await;
        self.wait_for_cache_sync().await;
        info!(
            namespace = %self.config.namespace,
            interval_secs = self.config.interval.as_secs(),
            "starting autoscale reconciler"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    match tokio::time::timeout(self.config.pass_timeout, self.reconcile()).await {
                        Ok(summary) => self.health.record_pass(summary).await,
                        Err(_) => {
                            warn!("reconcile pass timed out");
                            self.metrics.inc_reconcile_errors();
                            self.health.record_pass_timeout().await;
                        }
                    }
                    self.metrics.observe_reconcile_latency(start.elapsed().as_secs_f64());
                }
                _ = shutdown.recv() => {
                    info!("shutting down autoscale reconciler");
                    self.scalers.clear();
                    self.optimizers.clear();
                    break;
                }
            }
        }
    }

    /// One reconciliation pass over all bindings in the namespace.
    ///
    /// The returned summary feeds the controller's health state.
    pub async fn reconcile(&mut self) -> PassSummary {
        debug!("start to reconcile");
        let bindings = match self.bindings.list_bindings(&self.config.namespace).await {
            Ok(bindings) => bindings,
            Err(e) => {
                warn!(error = %e, "failed to list policy bindings");
                self.metrics.inc_reconcile_errors();
                return PassSummary {
                    bindings: 0,
                    errors: 1,
                    no_signal: 0,
                };
            }
        };

        let mut scaler_keys = HashSet::new();
        let mut optimizer_keys = HashSet::new();
        for binding in &bindings {
            if binding.policy_ref.is_empty() {
                warn!(binding = %binding.name, "binding has an empty policy reference");
                continue;
            }
            match (&binding.homogeneous, &binding.heterogeneous) {
                (Some(spec), None) => {
                    scaler_keys
                        .insert(autoscaler_map_key(&binding.name, Some(&spec.target.target_ref)));
                }
                (None, Some(_)) => {
                    optimizer_keys.insert(autoscaler_map_key(&binding.name, None));
                }
                _ => {
                    warn!(
                        binding = %binding.name,
                        "exactly one of homogeneous or heterogeneous must be set"
                    );
                }
            }
        }

        // Drop state of bindings that disappeared or changed mode.
        self.scalers.retain(|key, _| scaler_keys.contains(key));
        self.optimizers.retain(|key, _| optimizer_keys.contains(key));
        self.metrics
            .set_active(self.scalers.len() as i64, self.optimizers.len() as i64);

        let mut summary = PassSummary {
            bindings: bindings.len(),
            errors: 0,
            no_signal: 0,
        };
        for binding in &bindings {
            match self.schedule(binding).await {
                Ok(BindingOutcome::NoSignal) => summary.no_signal += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(binding = %binding.name, error = %e, "failed to reconcile binding");
                    self.metrics.inc_reconcile_errors();
                    summary.errors += 1;
                }
            }
        }
        summary
    }

    /// Dispatch one binding to its scaler or optimizer
    async fn schedule(&mut self, binding: &PolicyBinding) -> Result<BindingOutcome> {
        debug!(binding = %binding.name, "processing policy binding");
        let policy = match self
            .policies
            .get_policy(&binding.namespace, &binding.policy_ref)
            .await?
        {
            Some(policy) => policy,
            None => {
                warn!(
                    binding = %binding.name,
                    policy = %binding.policy_ref,
                    "referenced scaling policy not found"
                );
                return Ok(BindingOutcome::Skipped);
            }
        };

        match (&binding.homogeneous, &binding.heterogeneous) {
            (Some(spec), None) => self.scale_homogeneous(binding, &policy, spec).await,
            (None, Some(spec)) => self.optimize_heterogeneous(binding, &policy, spec).await,
            _ => Ok(BindingOutcome::Skipped),
        }
    }

    async fn scale_homogeneous(
        &mut self,
        binding: &PolicyBinding,
        policy: &ScalingPolicy,
        spec: &HomogeneousSpec,
    ) -> Result<BindingOutcome> {
        let key = autoscaler_map_key(&binding.name, Some(&spec.target.target_ref));
        if !self.scalers.contains_key(&key) {
            let metric_targets = metric_targets_of(policy);
            let scaler = Autoscaler::new(
                policy,
                binding,
                &metric_targets,
                self.config.collector.clone(),
                self.config.interval,
            )?;
            self.scalers.insert(key.clone(), scaler);
        }

        let current_instances = self
            .workloads
            .get_replicas(&spec.target.target_ref)
            .await
            .context("read current replica count")?;

        let Some(scaler) = self.scalers.get_mut(&key) else {
            return Ok(BindingOutcome::Skipped);
        };
        let decision = scaler
            .scale(self.pods.as_ref(), policy, current_instances)
            .await
            .context("homogeneous scaling cycle")?;
        let Some(decision) = decision else {
            debug!(binding = %binding.name, "scaling skipped this cycle");
            return Ok(BindingOutcome::NoSignal);
        };

        self.logger.log_scale_decision(
            &binding.name,
            &spec.target.target_ref.name,
            current_instances,
            decision,
        );
        self.metrics.observe_decision(&binding.name, decision);

        if decision.corrected != current_instances {
            self.workloads
                .set_replicas(&spec.target.target_ref, decision.corrected)
                .await
                .context("write replica count")?;
            self.logger.log_replicas_updated(
                &binding.name,
                &spec.target.target_ref.name,
                current_instances,
                decision.corrected,
            );
        }
        Ok(BindingOutcome::Completed)
    }

    async fn optimize_heterogeneous(
        &mut self,
        binding: &PolicyBinding,
        policy: &ScalingPolicy,
        spec: &HeterogeneousSpec,
    ) -> Result<BindingOutcome> {
        let key = autoscaler_map_key(&binding.name, None);
        if !self.optimizers.contains_key(&key) {
            let metric_targets = metric_targets_of(policy);
            let optimizer = Optimizer::new(
                policy,
                binding,
                &metric_targets,
                self.config.collector.clone(),
                self.config.interval,
            )?;
            self.optimizers.insert(key.clone(), optimizer);
        }

        let mut current_instances = HashMap::with_capacity(spec.params.len());
        for param in &spec.params {
            let replicas = self
                .workloads
                .get_replicas(&param.target.target_ref)
                .await
                .with_context(|| {
                    format!("read replicas of backend {}", param.target.target_ref.name)
                })?;
            current_instances.insert(param.target.target_ref.name.clone(), replicas);
        }

        let Some(optimizer) = self.optimizers.get_mut(&key) else {
            return Ok(BindingOutcome::Skipped);
        };
        let outcome = optimizer
            .optimize(self.pods.as_ref(), policy, &current_instances)
            .await
            .context("heterogeneous optimization cycle")?;
        let Some((decision, allocation)) = outcome else {
            debug!(binding = %binding.name, "optimization skipped this cycle");
            return Ok(BindingOutcome::NoSignal);
        };

        let instances_sum: i32 = current_instances.values().sum();
        self.logger
            .log_scale_decision(&binding.name, &binding.name, instances_sum, decision);
        self.metrics.observe_decision(&binding.name, decision);

        for param in &spec.params {
            let name = &param.target.target_ref.name;
            let Some(&replicas) = allocation.get(name) else {
                warn!(backend = %name, "no allocation computed for backend");
                continue;
            };
            let current = current_instances.get(name).copied().unwrap_or(0);
            if replicas == current {
                continue;
            }
            self.workloads
                .set_replicas(&param.target.target_ref, replicas)
                .await
                .with_context(|| format!("write replicas of backend {}", name))?;
            self.logger
                .log_replicas_updated(&binding.name, name, current, replicas);
        }
        Ok(BindingOutcome::Completed)
    }
}

/// Key of a binding's scaler/optimizer state.
///
/// Homogeneous keys include the target so a retargeted binding gets fresh
/// state; heterogeneous keys are the binding name alone.
pub fn autoscaler_map_key(binding_name: &str, target_ref: Option<&TargetRef>) -> String {
    match target_ref {
        Some(target_ref) => format!(
            "{}#{}#{}",
            binding_name,
            target_ref.normalized_kind(),
            target_ref.name
        ),
        None => binding_name.to_string(),
    }
}

/// Metric name to target value map of a policy
pub fn metric_targets_of(policy: &ScalingPolicy) -> Metrics {
    policy
        .metrics
        .iter()
        .map(|metric| (metric.metric_name.clone(), metric.target_value))
        .collect()
}
