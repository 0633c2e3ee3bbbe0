// packages/executor/src/lib.rs
//! Task Executor Library
//!
//! Pulls queued tasks, runs each one inside a resource-bounded,
//! network-isolated container, tracks and broadcasts progress, and reclaims
//! containers on every exit path.
//!
//! # Architecture
//!
//! The executor is structured into several key modules:
//!
//! - **queue**: inbound task queue and the dispatch loop
//! - **executor**: per-task state machine (the supervisor)
//! - **runtime**: container pool, container engine boundary, sandboxing
//! - **progress**: task state store, broadcast channels, webhooks
//! - **cleanup**: periodic reaper of stale containers
//! - **tools**: tool capability registry
//! - **task**: envelope and task state types
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and errors
//!
//! ```text
//! TaskQueue → QueueConsumer → ExecutionSupervisor ─┬─► ContainerPool ─► ContainerRuntime
//!                                                  └─► ProgressPublisher
//! CleanupSweeper ─────────────────────────────────────────────────────► ContainerRuntime
//! ```

// Public module exports
pub mod cleanup;
pub mod executor;
pub mod observability;
pub mod progress;
pub mod queue;
pub mod runtime;
pub mod task;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use executor::{ExecutionSupervisor, SupervisorConfig};
pub use runtime::{ContainerPool, ContainerPoolConfig};
pub use task::{TaskEnvelope, TaskState, TaskStatus};
pub use utils::config::ExecutorConfig;
pub use utils::errors::{ExecutorError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Executor build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({}, {})", self.version, self.git_hash, self.rustc_version)
    }
}
