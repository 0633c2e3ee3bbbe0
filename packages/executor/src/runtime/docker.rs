// packages/executor/src/runtime/docker.rs
//! Docker-backed container runtime
//!
//! Drives the `docker` CLI through `tokio::process`. Every command except
//! `wait` is bounded by `command_timeout`; `wait` is bounded by the caller.

use crate::runtime::container_runtime::{ContainerRuntime, ContainerSummary};
use crate::runtime::sandbox::{ContainerSpec, CREATED_AT_LABEL};
use crate::utils::errors::{ExecutorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Output of one engine command
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Container runtime backed by the docker CLI
pub struct DockerRuntime {
    /// Path or name of the docker binary
    binary: String,

    /// Upper bound for non-blocking engine commands
    command_timeout: Duration,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            command_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Run a docker command to completion
    async fn exec(&self, args: &[String]) -> Result<CommandOutput> {
        debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ExecutorError::RuntimeError(format!("Failed to run '{}': {}", self.binary, e))
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a docker command with the command timeout applied
    async fn exec_bounded(&self, args: &[String]) -> Result<CommandOutput> {
        tokio::time::timeout(self.command_timeout, self.exec(args))
            .await
            .map_err(|_| {
                ExecutorError::RuntimeError(format!(
                    "docker {} did not finish within {:?}",
                    args.first().map(String::as_str).unwrap_or_default(),
                    self.command_timeout
                ))
            })?
    }

    /// Arguments for `docker create`
    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }

        for mount in &spec.mounts {
            args.push("--volume".to_string());
            args.push(mount.to_volume_arg());
        }

        args.extend(spec.limits.to_engine_args());
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("is already in progress")
}

/// Parse one `docker ps` line: ID, name, created-at label, engine CreatedAt
fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let mut fields = line.split('\t');
    let id = fields.next()?.trim();
    let name = fields.next()?.trim();
    let label = fields.next().unwrap_or_default().trim();
    let engine_created = fields.next().unwrap_or_default().trim();

    if id.is_empty() {
        return None;
    }

    let created_at = label
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| parse_engine_timestamp(engine_created))?;

    Some(ContainerSummary {
        id: id.to_string(),
        name: name.to_string(),
        created_at,
    })
}

/// Parse docker's `2024-01-01 12:00:00 +0000 UTC` format
fn parse_engine_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let head: Vec<&str> = value.split_whitespace().take(3).collect();
    if head.len() < 3 {
        return None;
    }
    DateTime::parse_from_str(&head.join(" "), "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let output = self.exec_bounded(&Self::create_args(spec)).await?;

        if !output.success {
            return Err(ExecutorError::ProvisioningError(format!(
                "docker create {}: {}",
                spec.name,
                output.stderr.trim()
            )));
        }

        let id = output.stdout.trim().to_string();
        debug!("Created container {} ({})", spec.name, id);
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let output = self
            .exec_bounded(&["start".to_string(), container_id.to_string()])
            .await?;

        if !output.success {
            return Err(ExecutorError::ProvisioningError(format!(
                "docker start {}: {}",
                container_id,
                output.stderr.trim()
            )));
        }

        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        let output = self
            .exec(&["wait".to_string(), container_id.to_string()])
            .await?;

        if !output.success {
            return Err(ExecutorError::RuntimeError(format!(
                "docker wait {}: {}",
                container_id,
                output.stderr.trim()
            )));
        }

        output.stdout.trim().parse::<i64>().map_err(|e| {
            ExecutorError::RuntimeError(format!(
                "Unexpected exit code '{}': {}",
                output.stdout.trim(),
                e
            ))
        })
    }

    async fn logs(&self, container_id: &str) -> Result<String> {
        let output = self
            .exec_bounded(&["logs".to_string(), container_id.to_string()])
            .await?;

        if !output.success {
            return Err(ExecutorError::RuntimeError(format!(
                "docker logs {}: {}",
                container_id,
                output.stderr.trim()
            )));
        }

        // container stderr arrives on our stderr
        let mut logs = output.stdout;
        logs.push_str(&output.stderr);
        Ok(logs)
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let output = self
            .exec_bounded(&["rm".to_string(), "--force".to_string(), container_id.to_string()])
            .await?;

        if output.success || is_missing_container(&output.stderr) {
            return Ok(());
        }

        Err(ExecutorError::RuntimeError(format!(
            "docker rm {}: {}",
            container_id,
            output.stderr.trim()
        )))
    }

    async fn list(&self, label: &str) -> Result<Vec<ContainerSummary>> {
        let format = format!(
            "{{{{.ID}}}}\t{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}\t{{{{.CreatedAt}}}}",
            CREATED_AT_LABEL
        );
        let args = vec![
            "ps".to_string(),
            "--all".to_string(),
            "--no-trunc".to_string(),
            "--filter".to_string(),
            format!("label={}", label),
            "--format".to_string(),
            format,
        ];

        let output = self.exec_bounded(&args).await?;
        if !output.success {
            return Err(ExecutorError::RuntimeError(format!(
                "docker ps: {}",
                output.stderr.trim()
            )));
        }

        let mut containers = Vec::new();
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_ps_line(line) {
                Some(summary) => containers.push(summary),
                None => warn!("Skipping unparseable container entry: {}", line),
            }
        }

        Ok(containers)
    }
}
