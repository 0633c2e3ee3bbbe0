// packages/executor/src/runtime/mock.rs
//! Scriptable in-memory container runtime
//!
//! Behaves like the engine as far as the pool and the sweeper can tell:
//! containers are created, started, waited on and removed, and each task's
//! behaviour (exit code, delay, hang, result artifact, provisioning failure)
//! can be scripted by task id. Every create/remove is recorded so tests can
//! check the one-create-one-remove invariant and the concurrency ceiling.

use crate::runtime::container_runtime::{ContainerRuntime, ContainerSummary};
use crate::runtime::sandbox::{ContainerSpec, CONTAINER_WORKSPACE, CREATED_AT_LABEL, TASK_ID_LABEL};
use crate::utils::errors::{ExecutorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Scripted behaviour of one task's container
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub exit_code: i64,

    /// Time spent "running" before exiting
    pub delay: Duration,

    /// Never exit
    pub hang: bool,

    /// Contents written to `result.json` before exiting
    pub result: Option<String>,

    /// Logs returned after exit
    pub logs: String,

    pub fail_create: bool,
    pub fail_start: bool,

    /// Panic inside `wait` (simulates a bug in a step)
    pub panic_on_wait: bool,
}

impl MockBehavior {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }
}

/// Recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    Created { task_id: String, container_id: String },
    Started { task_id: String },
    Removed { task_id: String, container_id: String },
}

#[derive(Debug, Clone)]
struct MockContainer {
    task_id: String,
    name: String,
    labels: Vec<(String, String)>,
    workspace: Option<PathBuf>,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    containers: HashMap<String, MockContainer>,
    behaviors: HashMap<String, MockBehavior>,
    events: Vec<RuntimeEvent>,
    peak_live: usize,
    inputs_seen: HashMap<String, bool>,
}

/// In-memory `ContainerRuntime`
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the container for `task_id`
    pub fn set_behavior(&self, task_id: &str, behavior: MockBehavior) {
        self.state.lock().behaviors.insert(task_id.to_string(), behavior);
    }

    /// Insert a container nobody in this process knows about, as a crashed
    /// executor would have left behind
    pub fn insert_orphan(&self, name: &str, label: &str, created_at: DateTime<Utc>) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("orphan-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                task_id: String::new(),
                name: name.to_string(),
                labels: vec![
                    (label.to_string(), "true".to_string()),
                    (CREATED_AT_LABEL.to_string(), created_at.timestamp_millis().to_string()),
                ],
                workspace: None,
                created_at,
            },
        );
        id
    }

    /// All recorded events, in order
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.state.lock().events.clone()
    }

    pub fn create_count(&self, task_id: &str) -> usize {
        self.count(|e| matches!(e, RuntimeEvent::Created { task_id: t, .. } if t == task_id))
    }

    pub fn remove_count(&self, task_id: &str) -> usize {
        self.count(|e| matches!(e, RuntimeEvent::Removed { task_id: t, .. } if t == task_id))
    }

    fn count(&self, pred: impl Fn(&RuntimeEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Containers currently present in the "engine"
    pub fn live_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.state.lock().containers.contains_key(container_id)
    }

    /// Highest number of simultaneously live task containers
    pub fn peak_live(&self) -> usize {
        self.state.lock().peak_live
    }

    /// Whether `task.json` existed in the workspace when the task started
    pub fn input_seen(&self, task_id: &str) -> bool {
        self.state
            .lock()
            .inputs_seen
            .get(task_id)
            .copied()
            .unwrap_or(false)
    }

    fn behavior_for(&self, container_id: &str) -> Result<(MockBehavior, MockContainer)> {
        let state = self.state.lock();
        let container = state
            .containers
            .get(container_id)
            .cloned()
            .ok_or_else(|| ExecutorError::RuntimeError(format!("No such container: {}", container_id)))?;
        let behavior = state
            .behaviors
            .get(&container.task_id)
            .cloned()
            .unwrap_or_default();
        Ok((behavior, container))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let task_id = spec.label(TASK_ID_LABEL).unwrap_or_default().to_string();
        let mut state = self.state.lock();

        if state.behaviors.get(&task_id).map(|b| b.fail_create).unwrap_or(false) {
            return Err(ExecutorError::ProvisioningError(format!(
                "mock create refused for {}",
                spec.name
            )));
        }

        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(ExecutorError::ProvisioningError(format!(
                "name {} already in use",
                spec.name
            )));
        }

        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        let workspace = spec
            .mounts
            .iter()
            .find(|m| m.container == CONTAINER_WORKSPACE)
            .map(|m| m.host.clone());
        let created_at = spec
            .label(CREATED_AT_LABEL)
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        state.containers.insert(
            id.clone(),
            MockContainer {
                task_id: task_id.clone(),
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                workspace,
                created_at,
            },
        );
        state.events.push(RuntimeEvent::Created {
            task_id,
            container_id: id.clone(),
        });

        let live = state.containers.values().filter(|c| !c.task_id.is_empty()).count();
        state.peak_live = state.peak_live.max(live);

        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let (behavior, container) = self.behavior_for(container_id)?;
        if behavior.fail_start {
            return Err(ExecutorError::ProvisioningError(format!(
                "mock start refused for {}",
                container.name
            )));
        }

        let input_present = container
            .workspace
            .as_ref()
            .map(|w| w.join("task.json").is_file())
            .unwrap_or(false);

        let mut state = self.state.lock();
        state.inputs_seen.insert(container.task_id.clone(), input_present);
        state.events.push(RuntimeEvent::Started {
            task_id: container.task_id,
        });
        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        let (behavior, container) = self.behavior_for(container_id)?;

        if behavior.panic_on_wait {
            panic!("mock wait panicked for {}", container.name);
        }

        if behavior.hang {
            std::future::pending::<()>().await;
        }

        if !behavior.delay.is_zero() {
            tokio::time::sleep(behavior.delay).await;
        }

        if let (Some(result), Some(workspace)) = (&behavior.result, &container.workspace) {
            tokio::fs::write(workspace.join("result.json"), result).await?;
        }

        Ok(behavior.exit_code)
    }

    async fn logs(&self, container_id: &str) -> Result<String> {
        let (behavior, _) = self.behavior_for(container_id)?;
        Ok(behavior.logs)
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(container) = state.containers.remove(container_id) {
            state.events.push(RuntimeEvent::Removed {
                task_id: container.task_id,
                container_id: container_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.labels.iter().any(|(k, _)| k == label))
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.name.clone(),
                created_at: c.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sandbox::SandboxConfig;

    #[tokio::test]
    async fn test_create_remove_recorded() {
        let runtime = MockRuntime::new();
        let spec = SandboxConfig::default().spec_for("t1", Utc::now());

        let id = runtime.create(&spec).await.unwrap();
        assert_eq!(runtime.live_count(), 1);

        runtime.remove(&id).await.unwrap();
        runtime.remove(&id).await.unwrap();

        assert_eq!(runtime.create_count("t1"), 1);
        assert_eq!(runtime.remove_count("t1"), 1);
        assert_eq!(runtime.live_count(), 0);
    }

    #[tokio::test]
    async fn test_scripted_exit_code() {
        let runtime = MockRuntime::new();
        runtime.set_behavior("t1", MockBehavior::exit(7).with_logs("oops"));
        let spec = SandboxConfig::default().spec_for("t1", Utc::now());

        let id = runtime.create(&spec).await.unwrap();
        runtime.start(&id).await.unwrap();
        assert_eq!(runtime.wait(&id).await.unwrap(), 7);
        assert_eq!(runtime.logs(&id).await.unwrap(), "oops");
    }

    #[tokio::test]
    async fn test_list_filters_by_label() {
        let runtime = MockRuntime::new();
        runtime.insert_orphan("a", "mine", Utc::now());
        runtime.insert_orphan("b", "theirs", Utc::now());

        let listed = runtime.list("mine").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a");
    }
}
