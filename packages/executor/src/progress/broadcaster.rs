// packages/executor/src/progress/broadcaster.rs
//! Per-task progress broadcast channels
//!
//! Delivery is best-effort: with no subscribers an event is simply dropped,
//! and a lagging subscriber loses the oldest events. Pollers re-read the
//! store, so nothing depends on every event arriving.

use crate::task::TaskState;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Default buffered events per task channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Fan-out of task state events, one channel per task
pub struct ProgressBroadcaster {
    channels: DashMap<String, broadcast::Sender<TaskState>>,
    capacity: usize,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to events for `task_id` (may precede the first event)
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskState> {
        self.channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    /// The channel is dropped after a terminal event, which closes it for
    /// subscribers once they have drained it.
    pub fn publish(&self, event: &TaskState) -> usize {
        let delivered = match self.channels.get(&event.task_id) {
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => 0,
        };

        if event.is_terminal() {
            self.channels.remove(&event.task_id);
        }

        trace!(task_id = %event.task_id, delivered, "Progress event published");
        delivered
    }

    /// Number of tasks with open channels
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ProgressUpdate;

    fn state(task_id: &str, update: ProgressUpdate) -> TaskState {
        let mut state = TaskState::new(task_id);
        state.apply(&update);
        state
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = ProgressBroadcaster::default();
        let delivered = broadcaster.publish(&state("t1", ProgressUpdate::running(10, "starting", "")));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_until_terminal() {
        let broadcaster = ProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe("t1");

        broadcaster.publish(&state("t1", ProgressUpdate::running(10, "starting", "")));
        broadcaster.publish(&state("t1", ProgressUpdate::completed(None, "")));

        assert_eq!(rx.recv().await.unwrap().progress, 10);
        assert_eq!(rx.recv().await.unwrap().progress, 100);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
        assert_eq!(broadcaster.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_channels_are_per_task() {
        let broadcaster = ProgressBroadcaster::default();
        let mut rx1 = broadcaster.subscribe("t1");
        let _rx2 = broadcaster.subscribe("t2");

        broadcaster.publish(&state("t2", ProgressUpdate::running(30, "initializing", "")));
        assert!(matches!(rx1.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }
}
