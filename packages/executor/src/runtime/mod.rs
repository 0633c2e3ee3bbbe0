// packages/executor/src/runtime/mod.rs
//! Container execution layer
//!
//! This module provides everything between a task id and a running,
//! isolated container:
//!
//! - **Container Runtime**: narrow boundary over the container engine
//! - **Docker**: `docker` CLI implementation of that boundary
//! - **Container Pool**: bounded arena of active task containers
//! - **Sandbox**: per-task container definition (mounts, env, labels)
//! - **Resource Limiter**: memory, CPU and network limits
//! - **Mock**: scriptable in-memory runtime for tests (`test-util` feature)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              ContainerPool (N slots)          │
//! │   task_id → ContainerHandle  (arena)          │
//! │        │                                      │
//! │        ▼                                      │
//! │   SandboxConfig ──► ContainerSpec             │
//! │        │              (limits, mounts, env)   │
//! │        ▼                                      │
//! │   dyn ContainerRuntime (Docker | Mock)        │
//! └───────────────────────────────────────────────┘
//!                         ▲
//!            CleanupSweeper lists by label
//! ```

pub mod container_pool;
pub mod container_runtime;
pub mod docker;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod resource_limiter;
pub mod sandbox;

// Re-export commonly used types
pub use container_pool::{ContainerHandle, ContainerPool, ContainerPoolConfig, PoolStats, WaitOutcome};
pub use container_runtime::{ContainerRuntime, ContainerSummary};
pub use docker::DockerRuntime;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockBehavior, MockRuntime};
pub use resource_limiter::ResourceLimits;
pub use sandbox::{ContainerSpec, Mount, SandboxConfig};
