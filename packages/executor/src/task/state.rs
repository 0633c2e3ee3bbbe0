// packages/executor/src/task/state.rs
//! Persisted task state and the partial updates merged into it
//!
//! A `TaskState` is both the record pollers read and the event broadcast to
//! live observers. Merge rules:
//!
//! - terminal states (`completed`, `failed`) never change again
//! - while non-terminal, progress never decreases
//! - a `failed` update may reset progress to 0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task status as seen by pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative task state record (also the progress event payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,

    /// 0-100
    pub progress: u8,

    pub step: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Milliseconds between start and completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Queued,
            progress: 0,
            step: "queued".to_string(),
            message: String::new(),
            started_at: None,
            completed_at: None,
            duration: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a partial update. Returns `false` if the update was rejected
    /// because the state is already terminal.
    pub fn apply(&mut self, update: &ProgressUpdate) -> bool {
        if self.is_terminal() {
            return false;
        }

        let next_status = update.status.unwrap_or(self.status);

        if let Some(progress) = update.progress {
            let progress = progress.min(100);
            self.progress = if next_status == TaskStatus::Failed {
                progress
            } else {
                progress.max(self.progress)
            };
        }

        self.status = next_status;

        if let Some(step) = &update.step {
            self.step = step.clone();
        }
        if let Some(message) = &update.message {
            self.message = message.clone();
        }
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
        if update.duration.is_some() {
            self.duration = update.duration;
        }
        if update.result.is_some() {
            self.result = update.result.clone();
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }

        true
    }
}

/// Partial update merged into a `TaskState`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub step: Option<String>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    /// Non-terminal progress step
    pub fn running(progress: u8, step: &str, message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Running),
            progress: Some(progress),
            step: Some(step.to_string()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Terminal success
    pub fn completed(result: Option<serde_json::Value>, message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100),
            step: Some("completed".to_string()),
            message: Some(message.into()),
            result,
            ..Default::default()
        }
    }

    /// Terminal failure; `message` carries the cause
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: Some(TaskStatus::Failed),
            progress: Some(0),
            step: Some("failed".to_string()),
            error: Some(message.clone()),
            message: Some(message),
            ..Default::default()
        }
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Stamp completion time and duration since `started`
    pub fn finished(mut self, started: DateTime<Utc>, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self.duration = Some((at - started).num_milliseconds().max(0) as u64);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_state_is_queued() {
        let state = TaskState::new("t1");
        assert_eq!(state.status, TaskStatus::Queued);
        assert_eq!(state.progress, 0);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_progress_never_decreases_while_running() {
        let mut state = TaskState::new("t1");
        state.apply(&ProgressUpdate::running(30, "initializing", ""));
        state.apply(&ProgressUpdate::running(10, "starting", ""));
        assert_eq!(state.progress, 30);
        assert_eq!(state.step, "starting");
    }

    #[test]
    fn test_failed_resets_progress() {
        let mut state = TaskState::new("t1");
        state.apply(&ProgressUpdate::running(30, "initializing", ""));
        state.apply(&ProgressUpdate::failed("pool exhausted"));
        assert_eq!(state.status, TaskStatus::Failed);
        assert_eq!(state.progress, 0);
        assert_eq!(state.message, "pool exhausted");
        assert_eq!(state.error.as_deref(), Some("pool exhausted"));
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut state = TaskState::new("t1");
        assert!(state.apply(&ProgressUpdate::completed(None, "done")));
        assert!(!state.apply(&ProgressUpdate::running(50, "running", "")));
        assert!(!state.apply(&ProgressUpdate::failed("late")));
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(state.progress, 100);
    }

    #[test]
    fn test_finished_computes_duration() {
        let started = Utc::now();
        let at = started + chrono::Duration::milliseconds(1500);
        let update = ProgressUpdate::completed(None, "").finished(started, at);
        assert_eq!(update.duration, Some(1500));
        assert_eq!(update.completed_at, Some(at));
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut state = TaskState::new("t1");
        state.apply(&ProgressUpdate::running(10, "starting", "Starting").started_at(Utc::now()));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["status"], "running");
        assert!(json.get("startedAt").is_some());
        assert!(json.get("completedAt").is_none());
    }

    fn arb_update() -> impl Strategy<Value = ProgressUpdate> {
        prop_oneof![
            6 => (0u8..=120).prop_map(|p| ProgressUpdate::running(p, "step", "")),
            1 => Just(ProgressUpdate::completed(None, "")),
            1 => Just(ProgressUpdate::failed("boom")),
        ]
    }

    proptest! {
        #[test]
        fn prop_progress_monotonic_until_terminal(updates in prop::collection::vec(arb_update(), 1..40)) {
            let mut state = TaskState::new("t");
            let mut last = state.progress;

            for update in &updates {
                let was_terminal = state.is_terminal();
                let before = state.clone();
                let applied = state.apply(update);

                prop_assert!(state.progress <= 100);

                if was_terminal {
                    prop_assert!(!applied);
                    prop_assert_eq!(&state, &before);
                } else if !state.is_terminal() {
                    prop_assert!(state.progress >= last);
                }
                last = state.progress;
            }
        }
    }
}
