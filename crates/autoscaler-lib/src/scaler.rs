//! Homogeneous scaler: one target driven as a scalar replica count

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::algorithm::{CorrectedInstances, Metrics, RecommendedInstances, ScalingStatus};
use crate::cluster::PodLister;
use crate::collector::{CollectorConfig, MetricCollector};
use crate::models::{HomogeneousSpec, PolicyBinding, ScalingPolicy};

/// Static configuration of one homogeneous scaler
#[derive(Debug, Clone)]
pub struct ScalingMeta {
    pub config: HomogeneousSpec,
    pub binding_name: String,
    pub namespace: String,
}

/// Outcome of one scaling cycle
#[derive(Debug, Clone, Copy)]
pub struct ScaleDecision {
    /// Raw recommendation before correction.
    pub recommended: i32,
    /// Final replica count after stabilization, panic, and rate limits.
    pub corrected: i32,
    /// Whether the cycle ran in panic mode.
    pub panic: bool,
}

/// Drives one homogeneous target: collect, recommend, correct
pub struct Autoscaler {
    pub collector: MetricCollector,
    pub status: ScalingStatus,
    pub meta: ScalingMeta,
}

impl Autoscaler {
    pub fn new(
        policy: &ScalingPolicy,
        binding: &PolicyBinding,
        metric_targets: &Metrics,
        collector_config: CollectorConfig,
        loop_interval: Duration,
    ) -> Result<Self> {
        let config = binding
            .homogeneous
            .as_ref()
            .with_context(|| format!("binding {} has no homogeneous target", binding.name))?;
        Ok(Self {
            collector: MetricCollector::new(
                &config.target,
                binding,
                metric_targets,
                collector_config,
            ),
            status: ScalingStatus::new(&policy.behavior, loop_interval),
            meta: ScalingMeta {
                config: config.clone(),
                binding_name: binding.name.clone(),
                namespace: binding.namespace.clone(),
            },
        })
    }

    /// Run one cycle against the target's current replica count.
    ///
    /// Returns `None` when the cycle produced no usable signal; the caller
    /// must not write anything in that case. History only advances on a
    /// decision.
    pub async fn scale(
        &mut self,
        pod_lister: &dyn PodLister,
        policy: &ScalingPolicy,
        current_instances: i32,
    ) -> Result<Option<ScaleDecision>> {
        let (unready_instances, ready_metrics) =
            self.collector.update_metrics(pod_lister).await?;

        let ready_metrics = [ready_metrics];
        let recommendation = RecommendedInstances {
            min_instances: self.meta.config.min_replicas,
            max_instances: self.meta.config.max_replicas,
            current_instances,
            tolerance: policy.tolerance_percent as f64 * 0.01,
            metric_targets: &self.collector.metric_targets,
            unready_instances,
            ready_instances_metrics: &ready_metrics,
        };
        let (recommended, skip) = recommendation.compute();
        if skip {
            debug!(
                binding = %self.meta.binding_name,
                "no metric signal, skipping recommendation"
            );
            return Ok(None);
        }

        let panic_policy = &policy.behavior.scale_up.panic;
        if let Some(threshold) = panic_policy.panic_threshold_percent {
            if recommended * 100 >= current_instances * threshold {
                self.status.refresh_panic_mode();
            }
        }
        let panic = self.status.is_panic_mode();

        let corrected = CorrectedInstances {
            is_panic: panic,
            history: &self.status.history,
            behavior: &policy.behavior,
            min_instances: self.meta.config.min_replicas,
            max_instances: self.meta.config.max_replicas,
            current_instances,
            recommended_instances: recommended,
        }
        .compute();

        info!(
            binding = %self.meta.binding_name,
            namespace = %self.meta.namespace,
            current_instances,
            recommended_instances = recommended,
            corrected_instances = corrected,
            panic,
            "homogeneous scaling decision"
        );
        self.status.history.append_recommended(recommended);
        self.status.history.append_corrected(corrected);

        Ok(Some(ScaleDecision {
            recommended,
            corrected,
            panic,
        }))
    }
}
