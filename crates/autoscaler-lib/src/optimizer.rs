//! Heterogeneous optimizer: cost-aware allocation across backends
//!
//! Several backends with distinct unit costs and capacity bounds serve one
//! logical workload. The optimizer computes a single aggregate
//! recommendation over all backends and distributes it along a precomputed
//! scaling order of replica blocks: the greedy cost-minimizing expansion
//! order. With a cost expansion rate of 100% each backend is one block and
//! the cheapest fills completely first; otherwise blocks grow geometrically
//! inside each backend, modeling increasing marginal cost, so blocks of
//! different backends interleave.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::algorithm::{CorrectedInstances, Metrics, RecommendedInstances, ScalingStatus};
use crate::cluster::PodLister;
use crate::collector::{CollectorConfig, MetricCollector};
use crate::models::{HeterogeneousSpec, PolicyBinding, ScalingPolicy};
use crate::scaler::ScaleDecision;

/// One block of the scaling order: `replicas` additional instances of one
/// backend at the given aggregate cost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaBlock {
    name: String,
    /// Declaration index of the backend, the tie-breaker for equal costs.
    index: i32,
    replicas: i32,
    cost: i64,
}

/// Static configuration of one optimizer
#[derive(Debug, Clone)]
pub struct OptimizerMeta {
    pub config: HeterogeneousSpec,
    pub metric_targets: Metrics,
    pub scaling_order: Vec<ReplicaBlock>,
    /// Sum of per-backend minimum replicas.
    pub min_replicas: i32,
    /// Sum of per-backend maximum replicas.
    pub max_replicas: i32,
    pub binding_name: String,
    pub namespace: String,
}

impl OptimizerMeta {
    pub fn new(binding: &PolicyBinding, metric_targets: &Metrics) -> Result<Self> {
        let config = binding
            .heterogeneous
            .as_ref()
            .with_context(|| format!("binding {} has no heterogeneous target", binding.name))?;

        let expansion_rate = config.cost_expansion_rate_percent;
        let mut min_replicas = 0;
        let mut max_replicas = 0;
        let mut scaling_order = Vec::new();

        for (index, param) in config.params.iter().enumerate() {
            min_replicas += param.min_replicas;
            max_replicas += param.max_replicas;
            let mut remaining = param.max_replicas - param.min_replicas;
            if remaining <= 0 {
                continue;
            }
            let name = param.target.target_ref.name.clone();
            if expansion_rate == 100 {
                scaling_order.push(ReplicaBlock {
                    name,
                    index: index as i32,
                    replicas: remaining,
                    cost: param.cost as i64,
                });
                continue;
            }
            let mut block_len = 1.0_f64;
            while remaining > 0 {
                let current_len = remaining.min((block_len as i32).max(1));
                scaling_order.push(ReplicaBlock {
                    name: name.clone(),
                    index: index as i32,
                    replicas: current_len,
                    cost: param.cost as i64 * current_len as i64,
                });
                remaining -= current_len;
                block_len = block_len * expansion_rate as f64 / 100.0;
            }
        }

        scaling_order.sort_by_key(|block| (block.cost, block.index));

        Ok(Self {
            config: config.clone(),
            metric_targets: metric_targets.clone(),
            scaling_order,
            min_replicas,
            max_replicas,
            binding_name: binding.name.clone(),
            namespace: binding.namespace.clone(),
        })
    }

    /// Distribute an aggregate replica count across backends.
    ///
    /// Every backend starts at its minimum; the remainder is handed out
    /// block by block along the scaling order.
    pub fn distribute(&self, replicas: i32) -> HashMap<String, i32> {
        let mut allocation: HashMap<String, i32> = self
            .config
            .params
            .iter()
            .map(|param| (param.target.target_ref.name.clone(), param.min_replicas))
            .collect();

        let mut extra = replicas.max(self.min_replicas).min(self.max_replicas) - self.min_replicas;
        for block in &self.scaling_order {
            if extra <= 0 {
                break;
            }
            let take = extra.min(block.replicas);
            if let Some(count) = allocation.get_mut(&block.name) {
                *count += take;
            }
            extra -= take;
        }
        allocation
    }
}

/// Drives one heterogeneous fleet: collect per backend, recommend once,
/// correct once, distribute
pub struct Optimizer {
    pub meta: OptimizerMeta,
    pub collectors: HashMap<String, MetricCollector>,
    pub status: ScalingStatus,
}

impl Optimizer {
    pub fn new(
        policy: &ScalingPolicy,
        binding: &PolicyBinding,
        metric_targets: &Metrics,
        collector_config: CollectorConfig,
        loop_interval: Duration,
    ) -> Result<Self> {
        let meta = OptimizerMeta::new(binding, metric_targets)?;
        let collectors = meta
            .config
            .params
            .iter()
            .map(|param| {
                (
                    param.target.target_ref.name.clone(),
                    MetricCollector::new(
                        &param.target,
                        binding,
                        metric_targets,
                        collector_config.clone(),
                    ),
                )
            })
            .collect();
        Ok(Self {
            meta,
            collectors,
            status: ScalingStatus::new(&policy.behavior, loop_interval),
        })
    }

    /// Run one optimization cycle.
    ///
    /// `current_instances` maps backend name to its current replica count.
    /// Returns the per-backend allocation, or `None` when there was no
    /// usable metric signal; the caller must not write anything in that
    /// case.
    pub async fn optimize(
        &mut self,
        pod_lister: &dyn PodLister,
        policy: &ScalingPolicy,
        current_instances: &HashMap<String, i32>,
    ) -> Result<Option<(ScaleDecision, HashMap<String, i32>)>> {
        let mut unready_instances = 0;
        let mut ready_metrics = Vec::with_capacity(self.meta.config.params.len());
        let mut instances_sum = 0;

        for param in &self.meta.config.params {
            let name = &param.target.target_ref.name;
            let Some(collector) = self.collectors.get_mut(name) else {
                warn!(backend = %name, "no collector for backend");
                continue;
            };
            instances_sum += current_instances.get(name).copied().unwrap_or(0);
            match collector.update_metrics(pod_lister).await {
                Ok((unready, metrics)) => {
                    unready_instances += unready;
                    ready_metrics.push(metrics);
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, "backend metric collection failed");
                }
            }
        }

        let recommendation = RecommendedInstances {
            min_instances: self.meta.min_replicas,
            max_instances: self.meta.max_replicas,
            current_instances: instances_sum,
            tolerance: policy.tolerance_percent as f64 * 0.01,
            metric_targets: &self.meta.metric_targets,
            unready_instances,
            ready_instances_metrics: &ready_metrics,
        };
        let (recommended, skip) = recommendation.compute();
        if skip {
            debug!(
                binding = %self.meta.binding_name,
                "no metric signal, skipping optimization"
            );
            return Ok(None);
        }

        let panic_policy = &policy.behavior.scale_up.panic;
        if let Some(threshold) = panic_policy.panic_threshold_percent {
            if recommended * 100 >= instances_sum * threshold {
                self.status.refresh_panic_mode();
            }
        }
        let panic = self.status.is_panic_mode();

        let corrected = CorrectedInstances {
            is_panic: panic,
            history: &self.status.history,
            behavior: &policy.behavior,
            min_instances: self.meta.min_replicas,
            max_instances: self.meta.max_replicas,
            current_instances: instances_sum,
            recommended_instances: recommended,
        }
        .compute();

        info!(
            binding = %self.meta.binding_name,
            namespace = %self.meta.namespace,
            current_instances = instances_sum,
            recommended_instances = recommended,
            corrected_instances = corrected,
            panic,
            "heterogeneous scaling decision"
        );
        self.status.history.append_recommended(recommended);
        self.status.history.append_corrected(corrected);

        let allocation = self.meta.distribute(corrected);
        Ok(Some((
            ScaleDecision {
                recommended,
                corrected,
                panic,
            },
            allocation,
        )))
    }
}
