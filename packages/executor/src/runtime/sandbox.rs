// packages/executor/src/runtime/sandbox.rs
//! Sandbox definition for task containers
//!
//! Provides:
//! - Memory and CPU limits
//! - Network isolation
//! - A writable per-task workspace mount
//! - A read-only configuration mount
//! - Environment carrying only the task id and queue connection info

use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::config::ExecutorConfig;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Workspace mount point inside the container
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Configuration mount point inside the container
pub const CONTAINER_CONFIG: &str = "/config";

/// Label holding the task id
pub const TASK_ID_LABEL: &str = "task-executor.task-id";

/// Label holding creation time in epoch milliseconds
pub const CREATED_AT_LABEL: &str = "task-executor.created-at";

/// Characters of the task id kept verbatim in container names
const NAME_READABLE_CHARS: usize = 48;

/// Hex characters of the id digest appended to container names
const NAME_DIGEST_CHARS: usize = 16;

fn id_digest(task_id: &str) -> String {
    let hash = blake3::hash(task_id.as_bytes());
    hash.to_hex().as_str()[..NAME_DIGEST_CHARS].to_string()
}

/// Sandbox configuration shared by every task container
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Image to run
    pub image: String,

    /// Fixed entrypoint; the task id is appended as the last argument
    pub entrypoint: Vec<String>,

    /// Resource limits
    pub limits: ResourceLimits,

    /// Host directory holding per-task workspaces
    pub workspace_root: PathBuf,

    /// Host directory mounted read-only
    pub config_dir: PathBuf,

    /// Container name prefix
    pub name_prefix: String,

    /// Ownership label used by the sweeper
    pub managed_label: String,

    pub queue_name: String,
    pub queue_address: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

impl SandboxConfig {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            image: config.runtime.image.clone(),
            entrypoint: config.runtime.entrypoint.clone(),
            limits: config.runtime.resource_limits(),
            workspace_root: config.runtime.workspace_root.clone(),
            config_dir: config.runtime.config_dir.clone(),
            name_prefix: config.runtime.name_prefix.clone(),
            managed_label: config.runtime.managed_label.clone(),
            queue_name: config.queue.name.clone(),
            queue_address: config.queue.address.clone(),
        }
    }

    /// Container name for a task.
    ///
    /// Engine names allow `[a-zA-Z0-9_.-]`, so the readable part is a lossy
    /// rendering of the id. The trailing digest of the raw id keeps names
    /// distinct for ids that render alike (`a/b` and `a_b`).
    pub fn container_name(&self, task_id: &str) -> String {
        let readable: String = task_id
            .chars()
            .take(NAME_READABLE_CHARS)
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}-{}-{}", self.name_prefix, readable, id_digest(task_id))
    }

    /// Host workspace directory for a task
    pub fn workspace_for(&self, task_id: &str) -> PathBuf {
        let name = self.container_name(task_id);
        self.workspace_root.join(name)
    }

    /// Build the full container spec for a task
    pub fn spec_for(&self, task_id: &str, created_at: DateTime<Utc>) -> ContainerSpec {
        let mut command = self.entrypoint.clone();
        command.push(task_id.to_string());

        ContainerSpec {
            name: self.container_name(task_id),
            image: self.image.clone(),
            command,
            env: vec![
                ("TASK_ID".to_string(), task_id.to_string()),
                ("QUEUE_NAME".to_string(), self.queue_name.clone()),
                ("QUEUE_ADDRESS".to_string(), self.queue_address.clone()),
                ("WORKSPACE_DIR".to_string(), CONTAINER_WORKSPACE.to_string()),
            ],
            labels: vec![
                (self.managed_label.clone(), "true".to_string()),
                (TASK_ID_LABEL.to_string(), task_id.to_string()),
                (CREATED_AT_LABEL.to_string(), created_at.timestamp_millis().to_string()),
            ],
            mounts: vec![
                Mount {
                    host: self.workspace_for(task_id),
                    container: CONTAINER_WORKSPACE.to_string(),
                    read_only: false,
                },
                Mount {
                    host: self.config_dir.clone(),
                    container: CONTAINER_CONFIG.to_string(),
                    read_only: true,
                },
            ],
            limits: self.limits.clone(),
        }
    }
}

/// Bind mount
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    /// `-v` argument form
    pub fn to_volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Everything needed to create one task container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub limits: ResourceLimits,
}

impl ContainerSpec {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> SandboxConfig {
        SandboxConfig {
            workspace_root: PathBuf::from("/var/lib/executor"),
            config_dir: PathBuf::from("/etc/executor"),
            ..Default::default()
        }
    }

    #[test]
    fn test_container_name_is_sanitized() {
        let sandbox = sandbox();
        let name = sandbox.container_name("a/b c");
        assert!(name.starts_with("task-executor-a_b_c-"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'));

        // stable for the same id
        assert_eq!(name, sandbox.container_name("a/b c"));
    }

    #[test]
    fn test_ids_rendering_alike_get_distinct_names() {
        let sandbox = sandbox();
        assert_ne!(sandbox.container_name("a/b"), sandbox.container_name("a_b"));
        assert_ne!(sandbox.workspace_for("a/b"), sandbox.workspace_for("a_b"));
    }

    #[test]
    fn test_long_ids_are_bounded() {
        let sandbox = sandbox();
        let long = "x".repeat(500);
        let name = sandbox.container_name(&long);
        assert_eq!(
            name.len(),
            "task-executor-".len() + NAME_READABLE_CHARS + 1 + NAME_DIGEST_CHARS
        );
        assert_ne!(name, sandbox.container_name(&"x".repeat(501)));
    }

    #[test]
    fn test_spec_isolation() {
        let sandbox = sandbox();
        let spec = sandbox.spec_for("t1", Utc::now());

        assert!(spec.limits.network_disabled);
        assert_eq!(spec.env_var("TASK_ID"), Some("t1"));
        assert_eq!(spec.label(TASK_ID_LABEL), Some("t1"));
        assert_eq!(spec.label(&sandbox.managed_label), Some("true"));
        assert_eq!(spec.command.last().map(String::as_str), Some("t1"));

        // task content never travels through the environment
        assert!(spec.env.iter().all(|(k, _)| k != "TASK" && k != "TASK_CONTENT"));
    }

    #[test]
    fn test_mounts() {
        let spec = sandbox().spec_for("t1", Utc::now());
        let args: Vec<String> = spec.mounts.iter().map(Mount::to_volume_arg).collect();
        let workspace = sandbox().workspace_for("t1");
        assert!(workspace.starts_with("/var/lib/executor"));
        assert_eq!(
            args,
            vec![
                format!("{}:/workspace", workspace.display()),
                "/etc/executor:/config:ro".to_string(),
            ]
        );
    }
}
