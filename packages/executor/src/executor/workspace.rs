// packages/executor/src/executor/workspace.rs
//! Per-task workspace files
//!
//! The envelope goes in as `task.json` before the container starts; the
//! entrypoint leaves its output in `result.json`.

use crate::task::TaskEnvelope;
use crate::utils::errors::Result;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// Task input file name
pub const INPUT_FILE: &str = "task.json";

/// Result artifact file name
pub const RESULT_FILE: &str = "result.json";

/// Serialize the envelope into the workspace
pub async fn write_input(workspace: &Path, envelope: &TaskEnvelope) -> Result<()> {
    let path = workspace.join(INPUT_FILE);
    let body = serde_json::to_vec_pretty(envelope)?;
    tokio::fs::write(&path, body).await?;

    debug!(task_id = %envelope.id, "Wrote {}", path.display());
    Ok(())
}

/// Read the result artifact.
///
/// A missing artifact is `None`. An artifact that is not valid JSON is kept
/// as a JSON string of its raw text.
pub async fn read_result(workspace: &Path) -> Result<Option<Value>> {
    let path = workspace.join(RESULT_FILE);

    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No result artifact at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Result artifact {} is not JSON ({}), keeping raw text", path.display(), e);
            Ok(Some(Value::String(String::from_utf8_lossy(&raw).into_owned())))
        }
    }
}

/// Last `max_bytes` of `logs` (on a char boundary), trimmed
pub fn log_tail(logs: &str, max_bytes: usize) -> String {
    let logs = logs.trim();
    if logs.len() <= max_bytes {
        return logs.to_string();
    }

    let mut start = logs.len() - max_bytes;
    while !logs.is_char_boundary(start) {
        start += 1;
    }
    logs[start..].trim_start().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_input_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let envelope = TaskEnvelope::new("t1", "summarize").with_tools(["echo"]);

        write_input(dir.path(), &envelope).await.unwrap();

        let raw = std::fs::read(dir.path().join(INPUT_FILE)).unwrap();
        assert_eq!(TaskEnvelope::from_slice(&raw).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_missing_result_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_result(dir.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_result_json_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESULT_FILE), r#"{"answer":42}"#).unwrap();
        assert_eq!(read_result(dir.path()).await.unwrap(), Some(json!({"answer": 42})));
    }

    #[tokio::test]
    async fn test_invalid_result_kept_as_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESULT_FILE), "not json").unwrap();
        assert_eq!(read_result(dir.path()).await.unwrap(), Some(json!("not json")));
    }

    #[test]
    fn test_log_tail() {
        assert_eq!(log_tail("  short \n", 100), "short");
        assert_eq!(log_tail("abcdefghij", 4), "ghij");
        // never splits a multi-byte char
        assert_eq!(log_tail("ééé", 3), "é");
    }
}
