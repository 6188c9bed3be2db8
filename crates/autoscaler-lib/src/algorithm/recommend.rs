//! Raw replica recommendation from metric/target ratios

use super::Metrics;

/// Derives a recommended replica count from observed metrics.
///
/// The aggregate ratio is the maximum per-metric ratio of observed value to
/// target value, so the bottleneck metric drives scaling. The desired count
/// is that ratio applied to the currently *ready* instances, clamped to the
/// configured bounds, and suppressed inside the tolerance deadband.
#[derive(Debug)]
pub struct RecommendedInstances<'a> {
    pub min_instances: i32,
    pub max_instances: i32,
    pub current_instances: i32,
    /// Fraction of current instances the desired count must deviate by
    /// before a change is recommended, e.g. 0.1 for 10%.
    pub tolerance: f64,
    pub metric_targets: &'a Metrics,
    pub unready_instances: i32,
    /// One metric vector per backend; a single element for homogeneous
    /// targets.
    pub ready_instances_metrics: &'a [Metrics],
}

impl RecommendedInstances<'_> {
    /// Compute `(recommended, skip)`.
    ///
    /// `skip` is true only for degenerate input: no metric targets, no
    /// positive target value, or no observed metrics at all. Callers must do
    /// nothing for the cycle when `skip` is set, including not advancing any
    /// history.
    pub fn compute(&self) -> (i32, bool) {
        if self.metric_targets.is_empty() {
            return (0, true);
        }

        let mut observed = Metrics::new();
        for metrics in self.ready_instances_metrics {
            for (name, value) in metrics {
                *observed.entry(name.clone()).or_insert(0.0) += value;
            }
        }
        if observed.is_empty() {
            return (0, true);
        }

        let mut ratio: Option<f64> = None;
        for (name, target) in self.metric_targets {
            if *target <= 0.0 {
                continue;
            }
            let value = observed.get(name).copied().unwrap_or(0.0);
            let metric_ratio = value / target;
            ratio = Some(ratio.map_or(metric_ratio, |r| r.max(metric_ratio)));
        }
        let Some(ratio) = ratio else {
            return (0, true);
        };

        let ready_instances = (self.current_instances - self.unready_instances).max(0);
        let desired = (ratio * ready_instances as f64).ceil() as i32;
        let desired = desired.clamp(self.min_instances, self.max_instances);

        let deviation = (desired - self.current_instances).abs() as f64;
        if deviation < self.current_instances as f64 * self.tolerance {
            return (self.current_instances, false);
        }
        (desired, false)
    }
}
