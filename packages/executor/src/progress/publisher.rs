// packages/executor/src/progress/publisher.rs
//! Progress publisher: the single writer of task state
//!
//! Every update goes through three stages, in order:
//!
//! 1. merge into the state store (authoritative, pollers read this)
//! 2. broadcast on the task's channel (best-effort, live observers)
//! 3. POST to the envelope's webhook, if any (best-effort, one attempt)

use crate::observability::metric_names;
use crate::progress::broadcaster::ProgressBroadcaster;
use crate::progress::state_store::StateStore;
use crate::progress::webhook::CallbackSink;
use crate::task::{ProgressUpdate, TaskEnvelope, TaskState};
use crate::utils::errors::{ExecutorError, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Usage key for callers that sent no token
const ANONYMOUS_CALLER: &str = "anonymous";

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Characters of the caller token kept in usage keys
    pub token_prefix_len: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { token_prefix_len: 8 }
    }
}

/// Task state writer and progress fan-out
pub struct ProgressPublisher {
    config: PublisherConfig,
    store: Arc<dyn StateStore>,
    broadcaster: ProgressBroadcaster,
    callback: Option<Arc<dyn CallbackSink>>,
}

impl ProgressPublisher {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            config: PublisherConfig::default(),
            store,
            broadcaster: ProgressBroadcaster::default(),
            callback: None,
        }
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn CallbackSink>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Open the record for a new run of `envelope`. Fails with
    /// `DuplicateTask`, and publishes nothing, when the task id already has
    /// a record.
    pub async fn begin(&self, envelope: &TaskEnvelope, update: ProgressUpdate) -> Result<TaskState> {
        let Some(state) = self.store.create(&envelope.id, &update).await? else {
            return Err(ExecutorError::DuplicateTask(envelope.id.clone()));
        };

        self.fan_out(envelope, &state);
        Ok(state)
    }

    /// Merge, broadcast and (optionally) call back
    pub async fn update(&self, envelope: &TaskEnvelope, update: ProgressUpdate) -> Result<TaskState> {
        let outcome = self.store.merge(&envelope.id, &update).await?;

        if !outcome.applied {
            warn!(
                task_id = %envelope.id,
                status = %outcome.state.status,
                "Ignoring update for task already in a terminal state"
            );
            return Ok(outcome.state);
        }

        self.fan_out(envelope, &outcome.state);
        Ok(outcome.state)
    }

    fn fan_out(&self, envelope: &TaskEnvelope, state: &TaskState) {
        trace!(
            task_id = %state.task_id,
            status = %state.status,
            progress = state.progress,
            step = %state.step,
            "Task state updated"
        );

        self.broadcaster.publish(state);

        if let Some(url) = &envelope.webhook_url {
            self.notify(url, state.clone());
        }
    }

    /// Fire one callback on a detached task. A failed delivery is logged at
    /// debug level and dropped; there is no retry.
    fn notify(&self, url: &str, event: TaskState) {
        let Some(sink) = &self.callback else {
            return;
        };

        let sink = Arc::clone(sink);
        let url = url.to_string();

        tokio::spawn(async move {
            if let Err(e) = sink.deliver(&url, &event).await {
                debug!(task_id = %event.task_id, "Discarding failed callback to {}: {}", url, e);
            }
        });
    }

    /// Bump the caller's success/failure counter
    pub async fn record_usage(&self, caller_token: &str, succeeded: bool) -> Result<u64> {
        let caller = caller_prefix(caller_token, self.config.token_prefix_len);
        let outcome = if succeeded { "success" } else { "failure" };

        metrics::counter!(
            metric_names::CALLER_USAGE_TOTAL,
            "caller" => caller.clone(),
            "outcome" => outcome
        )
        .increment(1);

        self.store.incr_counter(&usage_key(&caller, succeeded), 1).await
    }

    /// Current persisted state of a task
    pub async fn get(&self, task_id: &str) -> Result<Option<TaskState>> {
        self.store.get(task_id).await
    }

    /// Live events for a task
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskState> {
        self.broadcaster.subscribe(task_id)
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }
}

/// Truncated caller token used for coarse usage accounting
pub fn caller_prefix(token: &str, len: usize) -> String {
    let prefix: String = token.trim().chars().take(len).collect();
    if prefix.is_empty() {
        ANONYMOUS_CALLER.to_string()
    } else {
        prefix
    }
}

/// Store key of a usage counter
pub fn usage_key(caller_prefix: &str, succeeded: bool) -> String {
    format!(
        "usage:{}:{}",
        caller_prefix,
        if succeeded { "success" } else { "failure" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::state_store::MemoryStateStore;
    use crate::task::TaskStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, TaskState)>>,
        fail: bool,
    }

    #[async_trait]
    impl CallbackSink for RecordingSink {
        async fn deliver(&self, url: &str, event: &TaskState) -> Result<()> {
            self.delivered.lock().push((url.to_string(), event.clone()));
            if self.fail {
                return Err(ExecutorError::Callback("refused".into()));
            }
            Ok(())
        }
    }

    fn publisher() -> ProgressPublisher {
        ProgressPublisher::new(Arc::new(MemoryStateStore::default()))
    }

    async fn settle() {
        // let detached callback tasks run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_update_persists_and_broadcasts() {
        let publisher = publisher();
        let envelope = TaskEnvelope::new("t1", "work");
        let mut rx = publisher.subscribe("t1");

        publisher
            .update(&envelope, ProgressUpdate::running(10, "starting", "Starting"))
            .await
            .unwrap();

        let stored = publisher.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.progress, 10);
        assert_eq!(rx.recv().await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_begin_refuses_existing_record() {
        let publisher = publisher();
        let envelope = TaskEnvelope::new("t1", "work");
        publisher
            .begin(&envelope, ProgressUpdate::running(10, "starting", "Starting"))
            .await
            .unwrap();
        publisher
            .update(&envelope, ProgressUpdate::running(30, "initializing", ""))
            .await
            .unwrap();

        let mut rx = publisher.subscribe("t1");
        let err = publisher
            .begin(&envelope, ProgressUpdate::running(10, "starting", "Starting"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::DuplicateTask(ref id) if id == "t1"));
        assert_eq!(publisher.get("t1").await.unwrap().unwrap().progress, 30);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_update_not_broadcast() {
        let publisher = publisher();
        let envelope = TaskEnvelope::new("t1", "work");
        publisher
            .update(&envelope, ProgressUpdate::failed("boom"))
            .await
            .unwrap();

        let mut rx = publisher.subscribe("t1");
        let state = publisher
            .update(&envelope, ProgressUpdate::running(50, "running", ""))
            .await
            .unwrap();

        assert_eq!(state.status, TaskStatus::Failed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_callback_only_with_webhook_url() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = publisher().with_callback(sink.clone());

        let plain = TaskEnvelope::new("t1", "work");
        publisher
            .update(&plain, ProgressUpdate::running(10, "starting", ""))
            .await
            .unwrap();

        let hooked = TaskEnvelope::new("t2", "work").with_webhook("http://example.test/hook");
        publisher
            .update(&hooked, ProgressUpdate::running(10, "starting", ""))
            .await
            .unwrap();

        settle().await;
        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "http://example.test/hook");
        assert_eq!(delivered[0].1.task_id, "t2");
    }

    #[tokio::test]
    async fn test_callback_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let publisher = publisher().with_callback(sink.clone());
        let envelope = TaskEnvelope::new("t1", "work").with_webhook("http://example.test/hook");

        let state = publisher
            .update(&envelope, ProgressUpdate::completed(None, "done"))
            .await
            .unwrap();
        assert_eq!(state.status, TaskStatus::Completed);

        settle().await;
        assert_eq!(sink.delivered.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_usage_counters_keyed_by_prefix() {
        let publisher = publisher();
        publisher.record_usage("abcdefgh-rest-of-token", true).await.unwrap();
        publisher.record_usage("abcdefgh-other", true).await.unwrap();
        publisher.record_usage("abcdefgh-other", false).await.unwrap();

        let store = publisher.store();
        assert_eq!(store.counter("usage:abcdefgh:success").await.unwrap(), 2);
        assert_eq!(store.counter("usage:abcdefgh:failure").await.unwrap(), 1);
    }

    #[test]
    fn test_caller_prefix() {
        assert_eq!(caller_prefix("abcdefghijkl", 8), "abcdefgh");
        assert_eq!(caller_prefix("abc", 8), "abc");
        assert_eq!(caller_prefix("", 8), "anonymous");
    }
}
