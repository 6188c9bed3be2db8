//! Replica recommendation and correction algorithms
//!
//! This module turns observed metric vectors into a replica count in two
//! stages: `RecommendedInstances` derives a raw count from metric/target
//! ratios under a tolerance band, and `CorrectedInstances` applies
//! stabilization smoothing, the panic override, and per-direction rate
//! limits against the scaler's history.

mod correct;
mod recommend;
mod status;

pub use correct::CorrectedInstances;
pub use recommend::RecommendedInstances;
pub use status::{ScalingHistory, ScalingStatus};

use std::collections::HashMap;

/// Metric name to value map
pub type Metrics = HashMap<String, f64>;

/// Accumulate a value into a metric vector
pub fn add_metric(metrics: &mut Metrics, name: &str, value: f64) {
    *metrics.entry(name.to_string()).or_insert(0.0) += value;
}
