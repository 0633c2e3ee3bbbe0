// packages/executor/src/progress/state_store.rs
//! Task state storage
//!
//! The store is the source of truth for polling clients. Records are keyed
//! `<prefix>:<task id>` and merged in place, so concurrent tasks only ever
//! touch their own key.

use crate::task::{ProgressUpdate, TaskState};
use crate::utils::errors::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Result of merging an update into a stored record
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Record after the merge (unchanged if rejected)
    pub state: TaskState,

    /// `false` when the record was already terminal
    pub applied: bool,
}

/// Shared task state store
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the record for `task_id` from `update`. Returns `None`, leaving
    /// the stored record untouched, when one already exists.
    async fn create(&self, task_id: &str, update: &ProgressUpdate) -> Result<Option<TaskState>>;

    /// Merge `update` into the record for `task_id`, creating it if needed
    async fn merge(&self, task_id: &str, update: &ProgressUpdate) -> Result<MergeOutcome>;

    async fn get(&self, task_id: &str) -> Result<Option<TaskState>>;

    /// Increment a named counter, returning the new value
    async fn incr_counter(&self, key: &str, by: u64) -> Result<u64>;

    async fn counter(&self, key: &str) -> Result<u64>;
}

/// In-process state store
pub struct MemoryStateStore {
    key_prefix: String,
    states: DashMap<String, TaskState>,
    counters: DashMap<String, u64>,
}

impl MemoryStateStore {
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            states: DashMap::new(),
            counters: DashMap::new(),
        }
    }

    fn key(&self, task_id: &str) -> String {
        format!("{}:{}", self.key_prefix, task_id)
    }

    /// Number of task records held
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new("task")
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create(&self, task_id: &str, update: &ProgressUpdate) -> Result<Option<TaskState>> {
        match self.states.entry(self.key(task_id)) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let mut state = TaskState::new(task_id);
                state.apply(update);
                Ok(Some(slot.insert(state).clone()))
            }
        }
    }

    async fn merge(&self, task_id: &str, update: &ProgressUpdate) -> Result<MergeOutcome> {
        let mut entry = self
            .states
            .entry(self.key(task_id))
            .or_insert_with(|| TaskState::new(task_id));

        let applied = entry.apply(update);

        Ok(MergeOutcome {
            state: entry.clone(),
            applied,
        })
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskState>> {
        Ok(self.states.get(&self.key(task_id)).map(|s| s.clone()))
    }

    async fn incr_counter(&self, key: &str, by: u64) -> Result<u64> {
        let mut counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += by;
        Ok(*counter)
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        Ok(self.counters.get(key).map(|c| *c).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[tokio::test]
    async fn test_merge_creates_record() {
        let store = MemoryStateStore::new("task");
        assert!(store.get("t1").await.unwrap().is_none());

        let outcome = store
            .merge("t1", &ProgressUpdate::running(10, "starting", "Starting"))
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.state.progress, 10);

        let stored = store.get("t1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_rejected_after_terminal() {
        let store = MemoryStateStore::default();
        store.merge("t1", &ProgressUpdate::failed("boom")).await.unwrap();

        let outcome = store
            .merge("t1", &ProgressUpdate::running(50, "running", ""))
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.state.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_create_only_when_absent() {
        let store = MemoryStateStore::default();
        let first = store
            .create("t1", &ProgressUpdate::running(10, "starting", "Starting"))
            .await
            .unwrap();
        assert_eq!(first.map(|s| s.progress), Some(10));

        store
            .merge("t1", &ProgressUpdate::running(30, "initializing", ""))
            .await
            .unwrap();
        let second = store
            .create("t1", &ProgressUpdate::running(10, "starting", "Starting"))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.get("t1").await.unwrap().unwrap().progress, 30);
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryStateStore::default();
        assert_eq!(store.counter("usage:abc:success").await.unwrap(), 0);
        store.incr_counter("usage:abc:success", 1).await.unwrap();
        assert_eq!(store.incr_counter("usage:abc:success", 2).await.unwrap(), 3);
    }
}
