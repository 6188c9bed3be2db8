//! Integration tests for metric collection
//!
//! These tests scrape real HTTP endpoints served on loopback, standing in
//! for serving pods, so parsing, readiness handling, and the histogram
//! baseline logic are exercised end to end.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use chrono::{TimeZone, Utc};

use crate::algorithm::Metrics;
use crate::cluster::{ClusterStore, ENTRY_LABEL_KEY, WORKLOAD_NAME_LABEL_KEY};
use crate::collector::{CollectorConfig, MetricCollector};
use crate::models::{
    MetricEndpoint, PodInfo, PodPhase, PolicyBinding, Target, TargetRef, WORKLOAD_KIND,
};

/// Shared scrape body that tests can swap between collection cycles
type Body = Arc<RwLock<String>>;

async fn metrics_handler(State(body): State<Body>) -> String {
    body.read().unwrap().clone()
}

/// Serve a mutable metrics body on a loopback port
async fn serve_metrics(initial: &str) -> (SocketAddr, Body) {
    let body: Body = Arc::new(RwLock::new(initial.to_string()));
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(body.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, body)
}

/// Serve a body that always answers 500
async fn serve_failing() -> SocketAddr {
    let app = Router::new().route(
        "/metrics",
        get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn target_for_port(port: u16) -> Target {
    Target {
        target_ref: TargetRef {
            kind: WORKLOAD_KIND.to_string(),
            namespace: "ns".to_string(),
            name: "model-a".to_string(),
        },
        additional_match_labels: BTreeMap::new(),
        metric_endpoint: MetricEndpoint {
            uri: "/metrics".to_string(),
            port,
        },
    }
}

fn binding() -> PolicyBinding {
    PolicyBinding {
        name: "binding-a".to_string(),
        namespace: "ns".to_string(),
        policy_ref: "policy-a".to_string(),
        homogeneous: None,
        heterogeneous: None,
    }
}

fn watch(names: &[(&str, f64)]) -> Metrics {
    names.iter().map(|(n, v)| (n.to_string(), *v)).collect()
}

fn test_config() -> CollectorConfig {
    CollectorConfig {
        scrape_timeout: Duration::from_secs(2),
        quantile: 0.95,
        // Zero fresh window so the previous cycle is the diff baseline.
        fresh_window: Duration::ZERO,
        retention: Duration::from_secs(300),
    }
}

fn ready_pod(name: &str, addr: SocketAddr) -> PodInfo {
    let mut labels = BTreeMap::new();
    labels.insert(WORKLOAD_NAME_LABEL_KEY.to_string(), "model-a".to_string());
    labels.insert(ENTRY_LABEL_KEY.to_string(), "true".to_string());
    PodInfo {
        name: name.to_string(),
        namespace: "ns".to_string(),
        ip: addr.ip().to_string(),
        phase: PodPhase::Running,
        start_time: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        ready: true,
        restart_count: 0,
        labels,
    }
}

#[tokio::test]
async fn test_gauge_values_are_summed_across_pods() {
    let (addr, _body) = serve_metrics("# TYPE load gauge\nload 2\n").await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));
    store.upsert_pod(ready_pod("pod-b", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (unready, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(unready, 0);
    assert_eq!(metrics["load"], 4.0);
}

#[tokio::test]
async fn test_unwatched_metrics_are_ignored() {
    let (addr, _body) = serve_metrics(
        "# TYPE load gauge\nload 2\n# TYPE other gauge\nother 99\n",
    )
    .await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (_, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert!(!metrics.contains_key("other"));
}

#[tokio::test]
async fn test_missing_watched_metric_is_zero_filled() {
    let (addr, _body) = serve_metrics("# TYPE load gauge\nload 2\n").await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0), ("queue", 5.0)]),
        test_config(),
    );
    let (_, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(metrics["load"], 2.0);
    assert_eq!(metrics["queue"], 0.0);
}

#[tokio::test]
async fn test_no_pods_yields_no_signal() {
    let store = ClusterStore::new();
    let mut collector = MetricCollector::new(
        &target_for_port(1),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (unready, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(unready, 0);
    assert!(metrics.is_empty());
}

#[tokio::test]
async fn test_unready_pod_reports_unready_and_no_signal() {
    let (addr, _body) = serve_metrics("# TYPE load gauge\nload 2\n").await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));
    let mut unready_pod = ready_pod("pod-b", addr);
    unready_pod.ready = false;
    store.upsert_pod(unready_pod);

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (unready, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(unready, 1);
    assert!(metrics.is_empty());
}

#[tokio::test]
async fn test_failed_pod_short_circuits_the_cycle() {
    let (addr, _body) = serve_metrics("# TYPE load gauge\nload 2\n").await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));
    let mut failed_pod = ready_pod("pod-b", addr);
    failed_pod.phase = PodPhase::Failed;
    store.upsert_pod(failed_pod);

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (unready, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(unready, 0);
    assert!(metrics.is_empty());
}

#[tokio::test]
async fn test_container_restart_counts_as_failed() {
    let (addr, _body) = serve_metrics("# TYPE load gauge\nload 2\n").await;
    let store = ClusterStore::new();
    let mut restarted = ready_pod("pod-a", addr);
    restarted.restart_count = 1;
    store.upsert_pod(restarted);

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (_, metrics) = collector.update_metrics(&store).await.unwrap();
    assert!(metrics.is_empty());
}

#[tokio::test]
async fn test_all_scrapes_failing_yields_no_signal() {
    let addr = serve_failing().await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (unready, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(unready, 0);
    assert!(metrics.is_empty());
}

#[tokio::test]
async fn test_one_failing_pod_is_dropped_from_the_sum() {
    let (addr, _body) = serve_metrics("# TYPE load gauge\nload 2\n").await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));
    // An unresolvable address makes this pod's scrape fail immediately.
    let mut bad_pod = ready_pod("pod-b", addr);
    bad_pod.ip = "256.1.1.1".to_string();
    store.upsert_pod(bad_pod);

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("load", 1.0)]),
        test_config(),
    );
    let (unready, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(unready, 0);
    assert_eq!(metrics["load"], 2.0);
}

#[tokio::test]
async fn test_histogram_quantile_over_diff_between_cycles() {
    let first = "# TYPE latency histogram\n\
                 latency_bucket{le=\"0.1\"} 10\n\
                 latency_bucket{le=\"0.5\"} 10\n\
                 latency_bucket{le=\"+Inf\"} 10\n\
                 latency_sum 1.0\n\
                 latency_count 10\n";
    let second = "# TYPE latency histogram\n\
                  latency_bucket{le=\"0.1\"} 10\n\
                  latency_bucket{le=\"0.5\"} 20\n\
                  latency_bucket{le=\"+Inf\"} 20\n\
                  latency_sum 5.0\n\
                  latency_count 20\n";
    let (addr, body) = serve_metrics(first).await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("latency", 0.2)]),
        test_config(),
    );
    collector.update_metrics(&store).await.unwrap();

    *body.write().unwrap() = second.to_string();
    let (_, metrics) = collector.update_metrics(&store).await.unwrap();
    // All 10 new observations landed in (0.1, 0.5]; p95 interpolates to the
    // bucket's upper bound.
    assert!((metrics["latency"] - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_pod_restart_resets_histogram_baseline() {
    let first = "# TYPE latency histogram\n\
                 latency_bucket{le=\"0.1\"} 10\n\
                 latency_bucket{le=\"0.5\"} 10\n\
                 latency_bucket{le=\"+Inf\"} 10\n\
                 latency_sum 1.0\n\
                 latency_count 10\n";
    let second = "# TYPE latency histogram\n\
                  latency_bucket{le=\"0.1\"} 10\n\
                  latency_bucket{le=\"0.5\"} 20\n\
                  latency_bucket{le=\"+Inf\"} 20\n\
                  latency_sum 5.0\n\
                  latency_count 20\n";
    let (addr, body) = serve_metrics(first).await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("latency", 0.2)]),
        test_config(),
    );
    collector.update_metrics(&store).await.unwrap();

    // The pod restarts between cycles: same name, later start time.
    let mut restarted = ready_pod("pod-a", addr);
    restarted.start_time = Some(Utc.timestamp_opt(1_700_000_100, 0).unwrap());
    store.upsert_pod(restarted);

    *body.write().unwrap() = second.to_string();
    let (_, metrics) = collector.update_metrics(&store).await.unwrap();
    // The baseline is discarded, so the quantile covers all 20 post-restart
    // observations: rank 19 lands 9/10 into the second bucket.
    assert!((metrics["latency"] - 0.46).abs() < 1e-9);
}

#[tokio::test]
async fn test_counter_value_is_taken_from_first_series() {
    let (addr, _body) = serve_metrics(
        "# TYPE requests_total counter\n\
         requests_total{path=\"/a\"} 7\n\
         requests_total{path=\"/b\"} 100\n",
    )
    .await;
    let store = ClusterStore::new();
    store.upsert_pod(ready_pod("pod-a", addr));

    let mut collector = MetricCollector::new(
        &target_for_port(addr.port()),
        &binding(),
        &watch(&[("requests_total", 10.0)]),
        test_config(),
    );
    let (_, metrics) = collector.update_metrics(&store).await.unwrap();
    assert_eq!(metrics["requests_total"], 7.0);
}
