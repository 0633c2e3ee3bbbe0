// packages/executor/src/bin/entrypoint.rs
//! Reference in-container entrypoint
//!
//! Reads `task.json` from the workspace, runs the requested tools in order
//! (each one receives the previous tool's output) and writes `result.json`.
//! Any failure exits non-zero, which the supervisor reports with the tail of
//! this process's output.

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use task_executor::executor::workspace::{INPUT_FILE, RESULT_FILE};
use task_executor::observability::init_tracing;
use task_executor::runtime::sandbox::CONTAINER_WORKSPACE;
use task_executor::tools::ToolRegistry;
use task_executor::utils::config::LogFormat;
use task_executor::TaskEnvelope;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(LogFormat::Pretty)?;

    let task_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TASK_ID").ok())
        .context("task id missing (argument or TASK_ID)")?;
    let workspace = PathBuf::from(
        std::env::var("WORKSPACE_DIR").unwrap_or_else(|_| CONTAINER_WORKSPACE.to_string()),
    );

    let raw = tokio::fs::read(workspace.join(INPUT_FILE))
        .await
        .with_context(|| format!("cannot read {} in {}", INPUT_FILE, workspace.display()))?;
    let envelope = TaskEnvelope::from_slice(&raw)?;

    if envelope.id != task_id {
        bail!("{} is for task {}, expected {}", INPUT_FILE, envelope.id, task_id);
    }

    let registry = ToolRegistry::with_builtins();
    let mut input = json!({ "taskId": envelope.id, "task": envelope.task });
    let mut outputs = Map::new();

    for name in &envelope.tools {
        let tool = registry.resolve(name)?;
        info!(task_id = %task_id, tool = %name, "Running tool");

        let output = tool
            .execute(input.clone())
            .await
            .with_context(|| format!("tool '{}' failed", name))?;
        outputs.insert(name.clone(), output.clone());
        input = output;
    }

    let result = json!({
        "taskId": task_id,
        "tools": envelope.tools,
        "outputs": Value::Object(outputs),
    });
    tokio::fs::write(workspace.join(RESULT_FILE), serde_json::to_vec_pretty(&result)?)
        .await
        .with_context(|| format!("cannot write {}", RESULT_FILE))?;

    info!(task_id = %task_id, "Task finished");
    Ok(())
}
