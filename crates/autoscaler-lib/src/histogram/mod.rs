//! Histogram snapshots and quantile-over-diff computation
//!
//! Latency-style metrics are exported as cumulative counter-bucket
//! histograms. A quantile over the full counter history is dominated by old
//! traffic, so the collector keeps time-stamped snapshots and computes
//! quantiles over the *difference* between two snapshots, giving a
//! short-horizon view of the distribution.

mod window;

pub use window::{SnapshotSlidingWindow, DEFAULT_FRESH_WINDOW, DEFAULT_RETENTION};

use anyhow::{bail, Result};

/// One cumulative bucket of a histogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketCount {
    /// Inclusive upper bound of the bucket (`le` in exposition format).
    pub upper_bound: f64,
    /// Observations with a value `<= upper_bound`.
    pub cumulative_count: u64,
}

/// Point-in-time capture of a counter-bucket histogram
///
/// Invariant: cumulative counts are non-decreasing along ascending bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub buckets: Vec<BucketCount>,
    pub total_count: u64,
    pub sum: f64,
}

impl Snapshot {
    pub fn new(buckets: Vec<(f64, u64)>, total_count: u64, sum: f64) -> Self {
        Self {
            buckets: buckets
                .into_iter()
                .map(|(upper_bound, cumulative_count)| BucketCount {
                    upper_bound,
                    cumulative_count,
                })
                .collect(),
            total_count,
            sum,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn same_layout(&self, other: &Snapshot) -> bool {
        self.buckets.len() == other.buckets.len()
            && self
                .buckets
                .iter()
                .zip(other.buckets.iter())
                .all(|(a, b)| a.upper_bound == b.upper_bound)
    }
}

/// Quantile of the observations recorded between `previous` and `current`.
///
/// Per-bucket deltas are clamped at zero, so the result is non-negative for
/// any pair of snapshots. An empty `previous` is treated as all-zero counts.
/// Returns 0 when no observations landed in the diff. Errors when the two
/// snapshots have different bucket layouts, which indicates the exporter
/// changed its histogram configuration mid-flight.
pub fn quantile_in_diff(quantile: f64, current: &Snapshot, previous: &Snapshot) -> Result<f64> {
    if !(0.0..=1.0).contains(&quantile) {
        bail!("quantile {} out of range [0, 1]", quantile);
    }
    if current.is_empty() {
        return Ok(0.0);
    }
    if !previous.is_empty() && !current.same_layout(previous) {
        bail!(
            "bucket layout changed between snapshots: {} vs {} buckets",
            previous.buckets.len(),
            current.buckets.len()
        );
    }

    let delta_at = |i: usize| -> u64 {
        let prev = if previous.is_empty() {
            0
        } else {
            previous.buckets[i].cumulative_count
        };
        current.buckets[i].cumulative_count.saturating_sub(prev)
    };

    let total = delta_at(current.buckets.len() - 1);
    if total == 0 {
        return Ok(0.0);
    }

    // Rank of the requested quantile, 1-based.
    let target = ((quantile * total as f64).ceil() as u64).max(1);

    let mut lower = 0.0;
    let mut below = 0u64;
    for (i, bucket) in current.buckets.iter().enumerate() {
        let cumulative = delta_at(i);
        if cumulative >= target {
            if bucket.upper_bound.is_infinite() {
                // No meaningful width in the overflow bucket.
                return Ok(lower);
            }
            let in_bucket = cumulative - below;
            let fraction = (target - below) as f64 / in_bucket as f64;
            return Ok(lower + fraction * (bucket.upper_bound - lower));
        }
        below = cumulative;
        lower = bucket.upper_bound;
    }

    // Unreachable for well-formed snapshots; the last bucket carries `total`.
    Ok(lower)
}
