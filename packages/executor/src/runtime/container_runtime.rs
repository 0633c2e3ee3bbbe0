// packages/executor/src/runtime/container_runtime.rs
//! Boundary over the container engine
//!
//! Everything the pool and the sweeper need from the engine goes through
//! `ContainerRuntime`. `DockerRuntime` is the production implementation;
//! `MockRuntime` is the scriptable in-memory one used by tests.

use crate::runtime::sandbox::ContainerSpec;
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Engine-side container listing entry
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    /// Engine container ID
    pub id: String,

    /// Container name
    pub name: String,

    /// Creation time (from the executor's label, else the engine)
    pub created_at: DateTime<Utc>,
}

/// Container engine operations
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning its engine ID
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container
    async fn start(&self, container_id: &str) -> Result<()>;

    /// Block until the container exits, returning its exit code
    async fn wait(&self, container_id: &str) -> Result<i64>;

    /// Combined stdout/stderr of the container
    async fn logs(&self, container_id: &str) -> Result<String>;

    /// Force-remove a container. Removing a missing container is `Ok`.
    async fn remove(&self, container_id: &str) -> Result<()>;

    /// List all containers (running or not) carrying `label`
    async fn list(&self, label: &str) -> Result<Vec<ContainerSummary>>;
}
