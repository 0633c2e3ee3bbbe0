// packages/executor/src/executor/supervisor.rs
//! Execution supervisor
//!
//! Drives one task from dequeue to a terminal state:
//!
//! ```text
//! STARTING (10) → INITIALIZING (30) → RUNNING → FINALIZING (90) → COMPLETED (100)
//!      │                 │                │            │
//!      └─────────────────┴────────────────┴────────────┴──► FAILED (0)
//! ```
//!
//! Every container that `create` hands out is removed exactly once, whatever
//! path the task takes out of `execute`: success, error, timeout, a panic in
//! one of the steps, or the future being dropped.

use crate::executor::workspace;
use crate::observability::metric_names;
use crate::progress::ProgressPublisher;
use crate::runtime::{ContainerHandle, ContainerPool, WaitOutcome};
use crate::task::{ProgressUpdate, TaskEnvelope, TaskState};
use crate::tools::ToolRegistry;
use crate::utils::config::ExecutorConfig;
use crate::utils::errors::{ExecutorError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on a container's run time
    pub task_timeout: Duration,

    /// Bytes of log tail kept in a non-zero exit message
    pub log_tail_bytes: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(600),
            log_tail_bytes: 2048,
        }
    }
}

impl SupervisorConfig {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            task_timeout: config.runtime.task_timeout(),
            ..Default::default()
        }
    }
}

/// Task state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Starting,
    Initializing,
    Running,
    Finalizing,
    Completed,
    Failed,
}

impl ExecutionPhase {
    /// Progress emitted on entering the phase (`Running` emits nothing)
    pub fn progress(&self) -> Option<u8> {
        match self {
            ExecutionPhase::Starting => Some(10),
            ExecutionPhase::Initializing => Some(30),
            ExecutionPhase::Running => None,
            ExecutionPhase::Finalizing => Some(90),
            ExecutionPhase::Completed => Some(100),
            ExecutionPhase::Failed => Some(0),
        }
    }

    pub fn step(&self) -> &'static str {
        match self {
            ExecutionPhase::Starting => "starting",
            ExecutionPhase::Initializing => "initializing",
            ExecutionPhase::Running => "running",
            ExecutionPhase::Finalizing => "finalizing",
            ExecutionPhase::Completed => "completed",
            ExecutionPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Completed | ExecutionPhase::Failed)
    }
}

/// Removes the container when the task leaves the supervisor.
///
/// `release` is the normal path. If the guard is dropped first (the
/// supervisor future was cancelled) removal is spawned onto the runtime.
struct ReleaseGuard {
    pool: Arc<ContainerPool>,
    handle: Option<ContainerHandle>,
}

impl ReleaseGuard {
    fn new(pool: Arc<ContainerPool>, handle: ContainerHandle) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    async fn release(mut self) {
        if let Some(handle) = self.handle.clone() {
            if let Err(e) = self.pool.remove(&handle).await {
                warn!(task_id = %handle.task_id, "Cleanup failed: {}", e);
            }
        }
        // cleared only after removal finished; a cancelled release falls back to Drop
        self.handle = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let pool = Arc::clone(&self.pool);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(task_id = %handle.task_id, "Supervisor dropped mid-task, removing container");
                runtime.spawn(async move {
                    if let Err(e) = pool.remove(&handle).await {
                        warn!(task_id = %handle.task_id, "Cleanup failed: {}", e);
                    }
                });
            }
            Err(_) => {
                error!(
                    task_id = %handle.task_id,
                    "No runtime to remove container {}, leaving it to the sweeper",
                    handle.name
                );
            }
        }
    }
}

/// Orchestrates task lifecycles over the pool and the publisher
pub struct ExecutionSupervisor {
    config: SupervisorConfig,
    pool: Arc<ContainerPool>,
    publisher: Arc<ProgressPublisher>,
    tools: Arc<ToolRegistry>,
}

impl ExecutionSupervisor {
    pub fn new(
        config: SupervisorConfig,
        pool: Arc<ContainerPool>,
        publisher: Arc<ProgressPublisher>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config,
            pool,
            publisher,
            tools,
        }
    }

    pub fn pool(&self) -> &Arc<ContainerPool> {
        &self.pool
    }

    pub fn publisher(&self) -> &Arc<ProgressPublisher> {
        &self.publisher
    }

    /// Run one task to a terminal state. Never fails: every error ends up
    /// as a `failed` task state.
    pub async fn execute(&self, envelope: TaskEnvelope) -> TaskState {
        let span = tracing::info_span!("task", task_id = %envelope.id);
        self.execute_inner(envelope).instrument(span).await
    }

    async fn execute_inner(&self, envelope: TaskEnvelope) -> TaskState {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(tools = ?envelope.tools, "Task dequeued");

        let outcome = self.run(&envelope, started_at).await;
        let elapsed = clock.elapsed();

        if let Err(ExecutorError::DuplicateTask(_)) = &outcome {
            return self.reject_duplicate(&envelope).await;
        }

        let (update, succeeded) = match &outcome {
            Ok(result) => (
                ProgressUpdate::completed(result.clone(), "Task completed"),
                true,
            ),
            Err(e) => (ProgressUpdate::failed(e.user_message()), false),
        };
        let update = update.finished(started_at, Utc::now());

        let state = match self.publisher.update(&envelope, update.clone()).await {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to persist terminal state: {}", e);
                let mut state = TaskState::new(envelope.id.as_str());
                state.apply(&update);
                state
            }
        };

        if let Err(e) = self.publisher.record_usage(&envelope.caller_token, succeeded).await {
            warn!("Failed to record usage: {}", e);
        }

        let outcome_label = if succeeded { "completed" } else { "failed" };
        let reason = outcome.as_ref().err().map(|e| e.kind()).unwrap_or("none");
        metrics::counter!(
            metric_names::TASKS_TOTAL,
            "outcome" => outcome_label,
            "reason" => reason
        )
        .increment(1);
        metrics::histogram!(metric_names::TASK_DURATION_SECONDS, "outcome" => outcome_label)
            .record(elapsed.as_secs_f64());

        match &outcome {
            Ok(_) => info!(duration_ms = elapsed.as_millis() as u64, "Task completed"),
            Err(e) if e.is_task_failure() => warn!(
                duration_ms = elapsed.as_millis() as u64,
                reason = e.kind(),
                "Task failed: {}",
                e
            ),
            Err(e) => error!(
                duration_ms = elapsed.as_millis() as u64,
                reason = e.kind(),
                "Task aborted by executor error: {}",
                e
            ),
        }

        state
    }

    /// A redelivered or reused task id. The existing record belongs to
    /// another run and is returned as-is; nothing is published or counted
    /// against the caller.
    async fn reject_duplicate(&self, envelope: &TaskEnvelope) -> TaskState {
        warn!(
            active = self.pool.is_active(&envelope.id),
            "Dropping envelope for a task id that already has state"
        );
        metrics::counter!(metric_names::DUPLICATE_TASKS_TOTAL).increment(1);

        match self.publisher.get(&envelope.id).await {
            Ok(Some(state)) => state,
            Ok(None) => TaskState::new(envelope.id.as_str()),
            Err(e) => {
                error!("Failed to read existing task state: {}", e);
                TaskState::new(envelope.id.as_str())
            }
        }
    }

    /// Steps up to the terminal update. Owns the container from `create` to
    /// removal.
    async fn run(&self, envelope: &TaskEnvelope, started_at: DateTime<Utc>) -> Result<Option<Value>> {
        let update = phase_update(ExecutionPhase::Starting, "Starting task").started_at(started_at);
        self.publisher.begin(envelope, update).await?;

        self.tools.check_all(envelope.tools.as_slice())?;

        let handle = self.pool.create(&envelope.id).await?;
        let guard = ReleaseGuard::new(Arc::clone(&self.pool), handle.clone());

        let outcome = AssertUnwindSafe(self.drive(envelope, &handle))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ExecutorError::RuntimeError(format!(
                    "task step panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        guard.release().await;
        outcome
    }

    /// Steps that need a live container
    async fn drive(&self, envelope: &TaskEnvelope, handle: &ContainerHandle) -> Result<Option<Value>> {
        workspace::write_input(&handle.workspace, envelope).await?;
        self.enter(
            envelope,
            ExecutionPhase::Initializing,
            "Container provisioned",
        )
        .await?;

        self.pool.start(handle).await?;
        debug!(phase = ExecutionPhase::Running.step(), "Waiting on container {}", handle.name);

        let code = match self.pool.wait(handle, self.config.task_timeout).await? {
            WaitOutcome::Exited(code) => code,
            WaitOutcome::TimedOut => {
                return Err(ExecutorError::ExecutionTimeout(self.config.task_timeout));
            }
        };

        let logs = match self.pool.logs(handle).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Failed to capture logs: {}", e);
                String::new()
            }
        };
        debug!(bytes = logs.len(), "Captured container logs");

        if code != 0 {
            return Err(ExecutorError::NonZeroExit {
                code,
                logs: workspace::log_tail(&logs, self.config.log_tail_bytes),
            });
        }

        self.enter(
            envelope,
            ExecutionPhase::Finalizing,
            "Collecting results",
        )
        .await?;

        workspace::read_result(&handle.workspace).await
    }

    async fn enter(&self, envelope: &TaskEnvelope, phase: ExecutionPhase, message: &str) -> Result<()> {
        if phase.progress().is_none() {
            debug!(phase = phase.step(), "Entering phase");
            return Ok(());
        }

        self.publisher.update(envelope, phase_update(phase, message)).await?;
        Ok(())
    }
}

/// Running update announcing `phase`
fn phase_update(phase: ExecutionPhase, message: &str) -> ProgressUpdate {
    debug!(phase = phase.step(), "Entering phase");
    ProgressUpdate::running(phase.progress().unwrap_or_default(), phase.step(), message)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
