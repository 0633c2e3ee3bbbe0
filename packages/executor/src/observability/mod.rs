// packages/executor/src/observability/mod.rs
//! Logging and metrics setup
//!
//! Tracing goes through `tracing-subscriber` (pretty or JSON, filtered by
//! `RUST_LOG`). Metrics are recorded with the `metrics` facade and, when an
//! address is configured, exported by a Prometheus listener.

use crate::utils::config::LogFormat;
use crate::utils::errors::{ExecutorError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Metric names
pub mod metric_names {
    pub const TASKS_TOTAL: &str = "executor_tasks_total";
    pub const TASK_DURATION_SECONDS: &str = "executor_task_duration_seconds";
    pub const ACTIVE_CONTAINERS: &str = "executor_active_containers";
    pub const MALFORMED_ENVELOPES_TOTAL: &str = "executor_malformed_envelopes_total";
    pub const DUPLICATE_TASKS_TOTAL: &str = "executor_duplicate_tasks_total";
    pub const SWEEPER_REMOVED_TOTAL: &str = "executor_sweeper_removed_total";
    pub const CALLER_USAGE_TOTAL: &str = "executor_caller_usage_total";
}

const DEFAULT_FILTER: &str = "task_executor=info,task_entrypoint=info";

/// Initialize the global tracing subscriber
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    result.map_err(|e| ExecutorError::InvalidConfig(format!("tracing init failed: {}", e)))
}

/// Install the Prometheus exporter when an address is given
pub fn init_metrics(addr: Option<&str>) -> Result<()> {
    let Some(addr) = addr else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| ExecutorError::InvalidConfig(format!("invalid metrics address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ExecutorError::InvalidConfig(format!("metrics exporter failed: {}", e)))?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}
