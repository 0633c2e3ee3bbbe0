// packages/executor/src/utils/config.rs
//! Executor configuration
//!
//! Layered with the `config` crate:
//!
//! 1. Built-in defaults (the `Default` impls below)
//! 2. Optional file `config/executor.{toml,yaml,json}` (or `EXECUTOR_CONFIG`)
//! 3. Environment variables, e.g. `EXECUTOR__RUNTIME__MAX_CONTAINERS=8`

use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::errors::{ExecutorError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level executor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub runtime: RuntimeSettings,
    pub queue: QueueSettings,
    pub state: StateSettings,
    pub cleanup: CleanupSettings,
    pub consumer: ConsumerSettings,
    pub usage: UsageSettings,
    pub callback: CallbackSettings,
    pub observability: ObservabilitySettings,
}

/// Execution environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Concurrency ceiling N
    pub max_containers: usize,

    /// Memory ceiling per container (engine size string, e.g. "2g")
    pub memory_limit: String,

    /// CPU quota per container (fractional CPUs)
    pub cpu_limit: f64,

    pub task_timeout_seconds: u64,

    /// Execution environment image reference
    pub image: String,

    /// Entrypoint command inside the image; the task id is appended
    pub entrypoint: Vec<String>,

    /// Container name prefix, also used by the sweeper
    pub name_prefix: String,

    /// Label marking containers owned by this executor
    pub managed_label: String,

    /// Host directory holding per-task workspaces
    pub workspace_root: PathBuf,

    /// Host directory mounted read-only as `/config`
    pub config_dir: PathBuf,

    /// Keep host workspaces after removal (debugging)
    pub keep_workspaces: bool,

    pub docker_binary: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_containers: 4,
            memory_limit: "2g".to_string(),
            cpu_limit: 1.0,
            task_timeout_seconds: 600,
            image: "task-runner:latest".to_string(),
            entrypoint: vec!["task-entrypoint".to_string()],
            name_prefix: "task-executor".to_string(),
            managed_label: "task-executor.managed".to_string(),
            workspace_root: std::env::temp_dir().join("task-executor"),
            config_dir: PathBuf::from("/etc/task-executor"),
            keep_workspaces: false,
            docker_binary: "docker".to_string(),
        }
    }
}

impl RuntimeSettings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory: Some(self.memory_limit.clone()),
            cpus: Some(self.cpu_limit),
            network_disabled: true,
        }
    }
}

/// Queue connection info (forwarded to containers)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: String,
    pub address: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "tasks".to_string(),
            address: "stdin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Prefix for task state keys (`<prefix>:<task id>`)
    pub key_prefix: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            key_prefix: "task".to_string(),
        }
    }
}

/// Cleanup sweeper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Retention threshold
    pub cleanup_after_ms: u64,

    /// Sweep interval
    pub interval_ms: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            cleanup_after_ms: 3_600_000,
            interval_ms: 60_000,
        }
    }
}

impl CleanupSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.cleanup_after_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Tasks processed concurrently; `None` means `runtime.max_containers`
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Characters of the caller token used as the usage key
    pub token_prefix_len: usize,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self { token_prefix_len: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    pub timeout_ms: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    pub log_format: LogFormat,

    /// Prometheus listener address; metrics are recorded but not exported when unset
    pub metrics_addr: Option<String>,
}

impl ExecutorConfig {
    /// Load configuration from file + environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("EXECUTOR_CONFIG").unwrap_or_else(|_| "config/executor".to_string());
        Self::load_from(&path)
    }

    /// Load configuration using an explicit file path (extension optional)
    pub fn load_from(path: &str) -> Result<Self> {
        let config: ExecutorConfig = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("EXECUTOR")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("runtime.entrypoint")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Effective consumer concurrency
    pub fn max_in_flight(&self) -> usize {
        self.consumer
            .max_in_flight
            .unwrap_or(self.runtime.max_containers)
            .max(1)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_containers == 0 {
            return Err(ExecutorError::InvalidConfig(
                "runtime.max_containers must be at least 1".into(),
            ));
        }

        if self.runtime.task_timeout_seconds == 0 {
            return Err(ExecutorError::InvalidConfig(
                "runtime.task_timeout_seconds must be at least 1".into(),
            ));
        }

        if self.runtime.image.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig("runtime.image is empty".into()));
        }

        if self.cleanup.interval_ms == 0 {
            return Err(ExecutorError::InvalidConfig(
                "cleanup.interval_ms must be at least 1".into(),
            ));
        }

        // the sweeper must never reclaim a container that is still inside its timeout
        if self.cleanup.retention() <= self.runtime.task_timeout() {
            return Err(ExecutorError::InvalidConfig(format!(
                "cleanup.cleanup_after_ms ({}) must exceed runtime.task_timeout_seconds ({}s)",
                self.cleanup.cleanup_after_ms, self.runtime.task_timeout_seconds
            )));
        }

        self.runtime
            .resource_limits()
            .validate()
            .map_err(ExecutorError::InvalidConfig)?;

        Ok(())
    }
}
