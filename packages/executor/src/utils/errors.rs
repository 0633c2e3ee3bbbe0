// packages/executor/src/utils/errors.rs
//! Error taxonomy for the executor
//!
//! Per-task failures (`PoolExhausted`, `ProvisioningError`, `ExecutionTimeout`,
//! `NonZeroExit`, `ToolNotFound`) are caught by the supervisor and turned into
//! a terminal `failed` task state. They never escape the consumer loop.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Executor errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Queue message could not be decoded into a task envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Concurrency ceiling reached, no environment was created
    #[error("pool exhausted ({max} containers active)")]
    PoolExhausted { max: usize },

    /// Environment could not be created or started
    #[error("provisioning failed: {0}")]
    ProvisioningError(String),

    /// Environment did not exit within the task timeout
    #[error("execution timed out after {}s", .0.as_secs())]
    ExecutionTimeout(Duration),

    /// Environment ran but signaled failure
    #[error("container exited with code {code}")]
    NonZeroExit { code: i64, logs: String },

    /// Requested tool is not registered
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// Container engine command failed
    #[error("runtime error: {0}")]
    RuntimeError(String),

    /// Inbound queue has no more messages and never will
    #[error("queue closed")]
    QueueClosed,

    /// Task id already has a state record from another run
    #[error("task {0} was already accepted")]
    DuplicateTask(String),

    #[error("callback delivery failed: {0}")]
    Callback(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutorError {
    /// Short step-independent cause shown to pollers in `message`
    pub fn user_message(&self) -> String {
        match self {
            ExecutorError::PoolExhausted { .. } => "pool exhausted".to_string(),
            ExecutorError::NonZeroExit { code, logs } if !logs.is_empty() => {
                format!("container exited with code {}: {}", code, logs)
            }
            other => other.to_string(),
        }
    }

    /// Whether this error is reported as a task failure (vs. infrastructure)
    pub fn is_task_failure(&self) -> bool {
        matches!(
            self,
            ExecutorError::PoolExhausted { .. }
                | ExecutorError::ProvisioningError(_)
                | ExecutorError::ExecutionTimeout(_)
                | ExecutorError::NonZeroExit { .. }
                | ExecutorError::ToolNotFound(_)
        )
    }

    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::MalformedEnvelope(_) => "malformed_envelope",
            ExecutorError::PoolExhausted { .. } => "pool_exhausted",
            ExecutorError::ProvisioningError(_) => "provisioning_error",
            ExecutorError::ExecutionTimeout(_) => "execution_timeout",
            ExecutorError::NonZeroExit { .. } => "non_zero_exit",
            ExecutorError::ToolNotFound(_) => "tool_not_found",
            ExecutorError::RuntimeError(_) => "runtime_error",
            ExecutorError::QueueClosed => "queue_closed",
            ExecutorError::DuplicateTask(_) => "duplicate_task",
            ExecutorError::Callback(_) => "callback",
            ExecutorError::Config(_) | ExecutorError::InvalidConfig(_) => "config",
            ExecutorError::Io(_) => "io",
            ExecutorError::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_message() {
        let err = ExecutorError::PoolExhausted { max: 1 };
        assert_eq!(err.user_message(), "pool exhausted");
        assert!(err.is_task_failure());
    }

    #[test]
    fn test_timeout_message() {
        let err = ExecutorError::ExecutionTimeout(Duration::from_secs(2));
        assert_eq!(err.to_string(), "execution timed out after 2s");
    }

    #[test]
    fn test_non_zero_exit_includes_logs() {
        let err = ExecutorError::NonZeroExit {
            code: 3,
            logs: "boom".to_string(),
        };
        assert_eq!(err.user_message(), "container exited with code 3: boom");

        let quiet = ExecutorError::NonZeroExit {
            code: 3,
            logs: String::new(),
        };
        assert_eq!(quiet.user_message(), "container exited with code 3");
    }

    #[test]
    fn test_infrastructure_errors_are_not_task_failures() {
        assert!(!ExecutorError::QueueClosed.is_task_failure());
        assert!(!ExecutorError::DuplicateTask("t1".into()).is_task_failure());
    }
}
