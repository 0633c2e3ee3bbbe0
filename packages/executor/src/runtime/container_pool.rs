// packages/executor/src/runtime/container_pool.rs
//! Bounded pool of task containers
//!
//! The pool owns the only record of which containers this process is
//! running: an arena keyed by task id. Callers get a `ContainerHandle`
//! back from `create` and hand it to `start`, `wait`, `logs` and `remove`;
//! they never see the arena itself.
//!
//! # Architecture
//!
//! ```text
//! ContainerPool
//! ├─ slots:  Semaphore(N)              (ceiling, never waited on)
//! └─ active: task_id → {handle, permit} (permit released on remove)
//! ```
//!
//! `create` takes a permit with `try_acquire`, so a full pool fails fast
//! with `PoolExhausted` instead of queueing.

use crate::observability::metric_names;
use crate::runtime::container_runtime::ContainerRuntime;
use crate::runtime::sandbox::SandboxConfig;
use crate::utils::errors::{ExecutorError, Result};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Configuration for the container pool
#[derive(Debug, Clone)]
pub struct ContainerPoolConfig {
    /// Concurrency ceiling N
    pub max_containers: usize,

    /// Keep host workspaces after removal
    pub keep_workspaces: bool,

    /// Container definition shared by all tasks
    pub sandbox: SandboxConfig,
}

impl Default for ContainerPoolConfig {
    fn default() -> Self {
        Self {
            max_containers: 4,
            keep_workspaces: false,
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Handle to one task's container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    pub task_id: String,

    /// Engine container ID
    pub container_id: String,

    pub name: String,

    /// Host path of the task workspace
    pub workspace: PathBuf,

    pub created_at: DateTime<Utc>,
}

/// How `wait` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i64),
    TimedOut,
}

struct ActiveContainer {
    handle: ContainerHandle,
    _permit: OwnedSemaphorePermit,
}

/// Container pool with a hard concurrency ceiling
pub struct ContainerPool {
    config: ContainerPoolConfig,
    runtime: Arc<dyn ContainerRuntime>,
    active: DashMap<String, ActiveContainer>,
    slots: Arc<Semaphore>,
}

impl ContainerPool {
    /// Create a new container pool
    pub fn new(config: ContainerPoolConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        info!(
            "Initializing container pool with {} slots (image {})",
            config.max_containers, config.sandbox.image
        );

        let slots = Arc::new(Semaphore::new(config.max_containers));

        Self {
            config,
            runtime,
            active: DashMap::new(),
            slots,
        }
    }

    /// Provision a container for `task_id` and register it
    pub async fn create(&self, task_id: &str) -> Result<ContainerHandle> {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| ExecutorError::PoolExhausted {
                max: self.config.max_containers,
            })?;

        if self.active.contains_key(task_id) {
            return Err(ExecutorError::ProvisioningError(format!(
                "task {} already has an active container",
                task_id
            )));
        }

        let created_at = Utc::now();
        let workspace = self.config.sandbox.workspace_for(task_id);

        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            ExecutorError::ProvisioningError(format!(
                "Failed to create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;

        let spec = self.config.sandbox.spec_for(task_id, created_at);
        let container_id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.discard_workspace(&workspace).await;
                return Err(match e {
                    ExecutorError::ProvisioningError(_) => e,
                    other => ExecutorError::ProvisioningError(other.to_string()),
                });
            }
        };

        let handle = ContainerHandle {
            task_id: task_id.to_string(),
            container_id,
            name: spec.name,
            workspace,
            created_at,
        };

        let registered = match self.active.entry(task_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ActiveContainer {
                    handle: handle.clone(),
                    _permit: permit,
                });
                true
            }
        };

        if !registered {
            // lost a race against a concurrent create for the same id
            if let Err(e) = self.runtime.remove(&handle.container_id).await {
                warn!("Failed to remove duplicate container {}: {}", handle.name, e);
            }
            return Err(ExecutorError::ProvisioningError(format!(
                "task {} already has an active container",
                task_id
            )));
        }

        self.record_active();
        info!(task_id, container = %handle.name, "Container created");
        Ok(handle)
    }

    /// Start the container's entrypoint
    pub async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        debug!(task_id = %handle.task_id, "Starting container {}", handle.name);

        self.runtime
            .start(&handle.container_id)
            .await
            .map_err(|e| match e {
                ExecutorError::ProvisioningError(_) => e,
                other => ExecutorError::ProvisioningError(other.to_string()),
            })
    }

    /// Wait for the container to exit, at most `timeout`
    pub async fn wait(&self, handle: &ContainerHandle, timeout: Duration) -> Result<WaitOutcome> {
        match tokio::time::timeout(timeout, self.runtime.wait(&handle.container_id)).await {
            Ok(Ok(code)) => {
                debug!(task_id = %handle.task_id, "Container exited with code {}", code);
                Ok(WaitOutcome::Exited(code))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(task_id = %handle.task_id, "Container did not exit within {:?}", timeout);
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    /// Capture container logs
    pub async fn logs(&self, handle: &ContainerHandle) -> Result<String> {
        self.runtime.logs(&handle.container_id).await
    }

    /// Force-remove the container and unregister it. Idempotent.
    pub async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let Some((_, entry)) = self
            .active
            .remove_if(&handle.task_id, |_, active| {
                active.handle.container_id == handle.container_id
            })
        else {
            debug!(task_id = %handle.task_id, "Container {} already removed", handle.name);
            return Ok(());
        };

        let result = self.runtime.remove(&handle.container_id).await;

        if !self.config.keep_workspaces {
            self.discard_workspace(&handle.workspace).await;
        }

        // slot is freed only once the engine has let go of the container
        drop(entry);
        self.record_active();

        match &result {
            Ok(()) => info!(task_id = %handle.task_id, container = %handle.name, "Container removed"),
            Err(e) => warn!(task_id = %handle.task_id, "Failed to remove container {}: {}", handle.name, e),
        }

        result
    }

    async fn discard_workspace(&self, workspace: &Path) {
        match tokio::fs::remove_dir_all(workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", workspace.display(), e),
        }
    }

    fn record_active(&self) {
        metrics::gauge!(metric_names::ACTIVE_CONTAINERS).set(self.active.len() as f64);
    }

    /// Number of registered containers
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let active = self.active.len();

        PoolStats {
            max_containers: self.config.max_containers,
            active_containers: active,
            available_slots: self.slots.available_permits(),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub max_containers: usize,
    pub active_containers: usize,
    pub available_slots: usize,
}
