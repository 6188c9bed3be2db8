//! Controller configuration

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use autoscaler_lib::collector::CollectorConfig;
use autoscaler_lib::reconciler::ReconcilerConfig;

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Namespace whose policy bindings are reconciled
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Interval between reconcile passes in seconds
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Timeout for one reconcile pass in seconds
    #[serde(default = "default_pass_timeout")]
    pub pass_timeout_secs: u64,

    /// Per-pod scrape timeout in seconds
    #[serde(default = "default_scrape_timeout")]
    pub scrape_timeout_secs: u64,
}

fn default_namespace() -> String {
    std::env::var("WATCH_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_reconcile_interval() -> u64 {
    15
}

fn default_pass_timeout() -> u64 {
    30
}

fn default_scrape_timeout() -> u64 {
    30
}

impl ControllerConfig {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AUTOSCALER"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| ControllerConfig {
            namespace: default_namespace(),
            api_port: default_api_port(),
            reconcile_interval_secs: default_reconcile_interval(),
            pass_timeout_secs: default_pass_timeout(),
            scrape_timeout_secs: default_scrape_timeout(),
        }))
    }

    /// Reconciler configuration derived from the loaded settings
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            namespace: self.namespace.clone(),
            interval: Duration::from_secs(self.reconcile_interval_secs),
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
            collector: CollectorConfig {
                scrape_timeout: Duration::from_secs(self.scrape_timeout_secs),
                ..CollectorConfig::default()
            },
        }
    }
}
