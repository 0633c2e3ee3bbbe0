// packages/executor/src/task/envelope.rs
//! Task envelope as it arrives on the queue

use crate::utils::errors::{ExecutorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable description of work submitted for execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnvelope {
    /// Unique task ID
    pub id: String,

    /// Task description text
    pub task: String,

    /// Requested tool names, in order
    #[serde(default)]
    pub tools: Vec<String>,

    /// Caller identity token
    #[serde(default)]
    pub caller_token: String,

    /// Optional progress callback URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Creation timestamp (set by the submission layer)
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            tools: Vec::new(),
            caller_token: String::new(),
            webhook_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_caller_token(mut self, token: impl Into<String>) -> Self {
        self.caller_token = token.into();
        self
    }

    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Decode a raw queue message
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let envelope: TaskEnvelope = serde_json::from_slice(raw)
            .map_err(|e| ExecutorError::MalformedEnvelope(e.to_string()))?;

        if envelope.id.trim().is_empty() {
            return Err(ExecutorError::MalformedEnvelope("empty task id".into()));
        }

        Ok(envelope)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_envelope() {
        let env = TaskEnvelope::from_slice(br#"{"id":"t1","task":"do it"}"#).unwrap();
        assert_eq!(env.id, "t1");
        assert!(env.tools.is_empty());
        assert!(env.webhook_url.is_none());
        assert_eq!(env.caller_token, "");
    }

    #[test]
    fn test_decode_camel_case_fields() {
        let raw = br#"{
            "id": "t2",
            "task": "search",
            "tools": ["search", "report"],
            "callerToken": "abcdef123456",
            "webhookUrl": "http://localhost/hook",
            "createdAt": "2024-01-01T12:00:00Z"
        }"#;
        let env = TaskEnvelope::from_slice(raw).unwrap();
        assert_eq!(env.tools, vec!["search", "report"]);
        assert_eq!(env.caller_token, "abcdef123456");
        assert_eq!(env.webhook_url.as_deref(), Some("http://localhost/hook"));
        assert_eq!(env.created_at.timestamp(), 1_704_110_400);
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = TaskEnvelope::from_slice(b"not json").unwrap_err();
        assert!(matches!(err, ExecutorError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_empty_id_is_malformed() {
        let err = TaskEnvelope::from_slice(br#"{"id":"  ","task":"x"}"#).unwrap_err();
        assert!(matches!(err, ExecutorError::MalformedEnvelope(_)));
    }
}
