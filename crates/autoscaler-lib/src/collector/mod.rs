//! Metric collection from serving pods
//!
//! Each scaling target owns one collector. A collection cycle lists the
//! target's pods, classifies readiness and failure, scrapes the Prometheus
//! endpoint of every pod concurrently under a per-pod timeout, and folds the
//! watched metric families into one metric vector. Histogram families are
//! reduced to a latency quantile over the diff against a sliding-window
//! baseline, which is discarded when the pod restarted in between.

mod promtext;

#[cfg(test)]
mod tests;

pub use promtext::{parse_families, FamilyKind, FamilyValue, HistogramData, MetricFamily};

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::algorithm::{add_metric, Metrics};
use crate::cluster::{target_labels, PodLister};
use crate::histogram::{
    quantile_in_diff, Snapshot, SnapshotSlidingWindow, DEFAULT_FRESH_WINDOW, DEFAULT_RETENTION,
};
use crate::models::{PodInfo, PolicyBinding, Target};

/// Default per-pod scrape timeout
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default quantile computed over histogram diffs
pub const DEFAULT_QUANTILE: f64 = 0.95;

/// Tunables for one collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Per-pod HTTP timeout for one scrape.
    pub scrape_timeout: Duration,
    /// Quantile reported for histogram metrics.
    pub quantile: f64,
    /// Minimum age of the snapshot used as the diff baseline.
    pub fresh_window: Duration,
    /// How long past snapshots are retained.
    pub retention: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
            quantile: DEFAULT_QUANTILE,
            fresh_window: DEFAULT_FRESH_WINDOW,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// Histogram snapshots of one pod, keyed by metric name
#[derive(Debug, Clone, Default)]
pub struct PodHistograms {
    /// Pod start time at snapshot time; a mismatch on the next cycle means
    /// the pod restarted and its counters reset.
    pub pod_start_time: Option<DateTime<Utc>>,
    pub histograms: HashMap<String, Snapshot>,
}

/// Readiness, failure, and metric aggregate of one collection cycle
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    /// All pods are running and ready.
    pub is_ready: bool,
    /// Any pod failed or had a container restart.
    pub is_failed: bool,
    pub metrics: Metrics,
}

impl InstanceInfo {
    /// Classify the target's pods before any scraping happens
    fn classify(pods: &[PodInfo]) -> Self {
        Self {
            is_ready: pods.iter().all(PodInfo::is_running_and_ready),
            is_failed: pods.iter().any(|p| p.is_failed() || p.container_restarted()),
            metrics: Metrics::new(),
        }
    }
}

/// Namespace and owning binding, carried for log context
#[derive(Debug, Clone)]
pub struct Scope {
    pub namespace: String,
    pub binding_name: String,
}

/// Scrapes and aggregates metrics for one scaling target
pub struct MetricCollector {
    past_histograms: SnapshotSlidingWindow<HashMap<String, PodHistograms>>,
    target: Target,
    scope: Scope,
    /// Metric name -> target value, as declared by the bound policy.
    pub metric_targets: Metrics,
    watch_set: HashSet<String>,
    config: CollectorConfig,
    client: reqwest::Client,
}

impl MetricCollector {
    pub fn new(
        target: &Target,
        binding: &PolicyBinding,
        metric_targets: &Metrics,
        config: CollectorConfig,
    ) -> Self {
        Self {
            past_histograms: SnapshotSlidingWindow::new(config.fresh_window, config.retention),
            target: target.clone(),
            scope: Scope {
                namespace: binding.namespace.clone(),
                binding_name: binding.name.clone(),
            },
            metric_targets: metric_targets.clone(),
            watch_set: metric_targets.keys().cloned().collect(),
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Run one collection cycle.
    ///
    /// Returns `(unready_count, ready_metrics)`. The metric map is empty when
    /// the cycle produced no usable signal: no pods, a failed pod, an unready
    /// pod, or every scrape failing. Callers treat an empty map as "skip this
    /// cycle". Single-pod scrape failures are logged and skipped.
    pub async fn update_metrics(&mut self, pod_lister: &dyn PodLister) -> Result<(i32, Metrics)> {
        let match_labels = target_labels(&self.target)
            .with_context(|| format!("invalid target {}", self.target.target_ref.name))?;
        let pods = pod_lister
            .list_pods(&self.scope.namespace, &match_labels)
            .await
            .with_context(|| format!("list pods in namespace {}", self.scope.namespace))?;
        if pods.is_empty() {
            warn!(
                binding = %self.scope.binding_name,
                namespace = %self.scope.namespace,
                target = %self.target.target_ref.name,
                "no pods matched the target selector"
            );
            return Ok((0, Metrics::new()));
        }

        let mut info = InstanceInfo::classify(&pods);
        if info.is_failed {
            warn!(
                binding = %self.scope.binding_name,
                namespace = %self.scope.namespace,
                "some pods of the target are failed, skipping scaling this cycle"
            );
            return Ok((0, Metrics::new()));
        }

        if !info.is_ready {
            warn!(
                binding = %self.scope.binding_name,
                namespace = %self.scope.namespace,
                "some pods of the target are not ready"
            );
            return Ok((1, Metrics::new()));
        }

        let bodies = self.scrape_pods(&pods).await;
        if bodies.is_empty() {
            warn!(
                binding = %self.scope.binding_name,
                namespace = %self.scope.namespace,
                "all pod scrapes failed, no metric signal this cycle"
            );
            return Ok((0, Metrics::new()));
        }

        let past = self.past_histograms.last_unfresh().cloned().unwrap_or_default();
        let mut current: HashMap<String, PodHistograms> = HashMap::with_capacity(bodies.len());

        for (pod_name, start_time, body) in bodies {
            // A changed start time means the pod restarted and its counters
            // reset; the stored baseline is unusable.
            let past_pod = past
                .get(&pod_name)
                .filter(|past| start_time.is_some() && past.pod_start_time == start_time);
            let mut pod_histograms = HashMap::new();
            self.process_exposition(
                &body,
                past_pod.map(|past| &past.histograms),
                &mut pod_histograms,
                &mut info.metrics,
            );
            current.insert(
                pod_name,
                PodHistograms {
                    pod_start_time: start_time,
                    histograms: pod_histograms,
                },
            );
        }

        // Make downstream arithmetic total over the watch set.
        for name in &self.watch_set {
            info.metrics.entry(name.clone()).or_insert(0.0);
        }

        self.past_histograms.append(current);
        Ok((0, info.metrics))
    }

    /// Fan out one HTTP GET per pod, dropping pods whose scrape fails
    async fn scrape_pods(
        &self,
        pods: &[PodInfo],
    ) -> Vec<(String, Option<DateTime<Utc>>, String)> {
        let mut tasks = JoinSet::new();
        for pod in pods {
            let client = self.client.clone();
            let url = format!(
                "http://{}:{}{}",
                pod.ip, self.target.metric_endpoint.port, self.target.metric_endpoint.uri
            );
            let timeout = self.config.scrape_timeout;
            let pod_name = pod.name.clone();
            let start_time = pod.start_time;
            tasks.spawn(async move {
                let body = scrape_one(&client, &url, timeout).await;
                (pod_name, start_time, body)
            });
        }

        let mut bodies = Vec::with_capacity(pods.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((pod_name, start_time, Ok(body))) => {
                    bodies.push((pod_name, start_time, body));
                }
                Ok((pod_name, _, Err(e))) => {
                    warn!(
                        binding = %self.scope.binding_name,
                        pod = %pod_name,
                        error = %e,
                        "pod scrape failed, dropping its contribution"
                    );
                }
                Err(e) => {
                    warn!(binding = %self.scope.binding_name, error = %e, "scrape task panicked");
                }
            }
        }
        bodies
    }

    /// Fold one scraped body into the cycle's metric vector
    fn process_exposition(
        &self,
        body: &str,
        past_histograms: Option<&HashMap<String, Snapshot>>,
        current_histograms: &mut HashMap<String, Snapshot>,
        metrics: &mut Metrics,
    ) {
        for family in parse_families(body) {
            if !self.watch_set.contains(&family.name) {
                debug!(metric = %family.name, "metric not in the watch set");
                continue;
            }
            match family.value {
                FamilyValue::Scalar(value) => add_metric(metrics, &family.name, value),
                FamilyValue::Histogram(data) => {
                    let snapshot = Snapshot::new(data.buckets, data.count, data.sum);
                    current_histograms.insert(family.name.clone(), snapshot.clone());

                    let baseline = past_histograms
                        .and_then(|m| m.get(&family.name))
                        .cloned()
                        .unwrap_or_default();
                    match quantile_in_diff(self.config.quantile, &snapshot, &baseline) {
                        Ok(value) => add_metric(metrics, &family.name, value),
                        Err(e) => warn!(
                            binding = %self.scope.binding_name,
                            metric = %family.name,
                            error = %e,
                            "quantile over histogram diff failed"
                        ),
                    }
                }
            }
        }
    }
}

async fn scrape_one(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<String> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("GET {} returned status {}", url, response.status());
    }
    response.text().await.context("read scrape response body")
}
