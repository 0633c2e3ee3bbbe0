// packages/executor/src/queue/consumer.rs
//! Queue consumer and dispatch loop
//!
//! A dispatch slot is taken *before* dequeuing, so the consumer never holds
//! a message it has no capacity to start. Each task then runs on its own
//! tokio task and gives the slot back when the supervisor returns. With
//! `max_in_flight = 1` consumption is strictly serial.

use crate::executor::ExecutionSupervisor;
use crate::observability::metric_names;
use crate::queue::TaskQueue;
use crate::task::TaskEnvelope;
use crate::utils::errors::{ExecutorError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters from one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Envelopes handed to the supervisor
    pub dispatched: u64,

    /// Messages dropped as malformed
    pub malformed: u64,
}

/// Reads envelopes off a `TaskQueue` and dispatches them
pub struct QueueConsumer {
    queue: Arc<dyn TaskQueue>,
    max_in_flight: usize,
    slots: Arc<Semaphore>,
    dispatched: AtomicU64,
    malformed: AtomicU64,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn TaskQueue>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            queue,
            max_in_flight,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            dispatched: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    /// Next well-formed envelope. Malformed messages are logged, counted and
    /// dropped; they never produce task state.
    pub async fn next_envelope(&self) -> Result<TaskEnvelope> {
        loop {
            let raw = self.queue.next().await?;

            match TaskEnvelope::from_slice(&raw) {
                Ok(envelope) => {
                    debug!(task_id = %envelope.id, "Dequeued envelope");
                    return Ok(envelope);
                }
                Err(e) => {
                    warn!(bytes = raw.len(), "Dropping message: {}", e);
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_names::MALFORMED_ENVELOPES_TOTAL).increment(1);
                }
            }
        }
    }

    /// Dispatch loop. Ends when the queue closes or `shutdown` fires, then
    /// waits for in-flight tasks. A queue error other than `QueueClosed` is
    /// returned after the drain.
    pub async fn run(
        &self,
        supervisor: Arc<ExecutionSupervisor>,
        shutdown: CancellationToken,
    ) -> Result<ConsumerReport> {
        info!("Queue consumer started ({} in flight max)", self.max_in_flight);
        let mut failure = None;

        loop {
            let slot = tokio::select! {
                _ = shutdown.cancelled() => break,
                slot = Arc::clone(&self.slots).acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            let envelope = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.next_envelope() => match next {
                    Ok(envelope) => envelope,
                    Err(ExecutorError::QueueClosed) => {
                        info!("Queue closed");
                        break;
                    }
                    Err(e) => {
                        error!("Queue read failed: {}", e);
                        failure = Some(e);
                        break;
                    }
                },
            };

            self.dispatched.fetch_add(1, Ordering::Relaxed);
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move {
                let _slot = slot;
                supervisor.execute(envelope).await;
            });
        }

        self.drain().await;
        let report = self.report();
        info!(
            dispatched = report.dispatched,
            malformed = report.malformed,
            "Queue consumer stopped"
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Wait until every dispatched task has given its slot back
    async fn drain(&self) {
        let in_flight = self.max_in_flight - self.slots.available_permits();
        if in_flight > 0 {
            info!("Waiting for {} in-flight tasks", in_flight);
        }

        let all = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        if let Ok(permits) = self.slots.acquire_many(all).await {
            drop(permits);
        }
    }

    pub fn report(&self) -> ConsumerReport {
        ConsumerReport {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    /// Tasks currently running
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SupervisorConfig;
    use crate::progress::{MemoryStateStore, ProgressPublisher};
    use crate::queue::MemoryQueue;
    use crate::runtime::{ContainerPool, ContainerPoolConfig, MockBehavior, MockRuntime, SandboxConfig};
    use crate::task::TaskStatus;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    fn supervisor(runtime: &MockRuntime, root: &std::path::Path, max: usize) -> Arc<ExecutionSupervisor> {
        let pool = ContainerPool::new(
            ContainerPoolConfig {
                max_containers: max,
                keep_workspaces: false,
                sandbox: SandboxConfig {
                    workspace_root: root.to_path_buf(),
                    ..Default::default()
                },
            },
            Arc::new(runtime.clone()),
        );
        Arc::new(ExecutionSupervisor::new(
            SupervisorConfig::default(),
            Arc::new(pool),
            Arc::new(ProgressPublisher::new(Arc::new(MemoryStateStore::default()))),
            Arc::new(ToolRegistry::with_builtins()),
        ))
    }

    #[tokio::test]
    async fn test_malformed_messages_skipped() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(b"not json".to_vec()).await.unwrap();
        queue.push(br#"{"id":"","task":"x"}"#.to_vec()).await.unwrap();
        queue.push(br#"{"id":"t1","task":"x"}"#.to_vec()).await.unwrap();

        let consumer = QueueConsumer::new(queue, 1);
        let envelope = consumer.next_envelope().await.unwrap();

        assert_eq!(envelope.id, "t1");
        assert_eq!(consumer.report().malformed, 2);
    }

    #[tokio::test]
    async fn test_run_until_queue_closes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = MockRuntime::new();
        let supervisor = supervisor(&runtime, dir.path(), 2);

        let queue = Arc::new(MemoryQueue::new());
        for id in ["a", "b", "c"] {
            let envelope = TaskEnvelope::new(id, "work");
            queue.push(envelope.to_vec().unwrap()).await.unwrap();
        }
        queue.close();

        let consumer = QueueConsumer::new(queue, 2);
        let report = consumer
            .run(Arc::clone(&supervisor), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.dispatched, 3);
        assert_eq!(consumer.in_flight(), 0);
        for id in ["a", "b", "c"] {
            let state = supervisor.publisher().get(id).await.unwrap().unwrap();
            assert_eq!(state.status, TaskStatus::Completed);
        }
        assert!(runtime.peak_live() <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = MockRuntime::new();
        runtime.set_behavior("slow", MockBehavior::exit(0).with_delay(Duration::from_millis(100)));
        let supervisor = supervisor(&runtime, dir.path(), 1);

        let queue = Arc::new(MemoryQueue::new());
        queue
            .push(TaskEnvelope::new("slow", "work").to_vec().unwrap())
            .await
            .unwrap();

        let consumer = Arc::new(QueueConsumer::new(queue, 1));
        let shutdown = CancellationToken::new();

        let run = {
            let consumer = Arc::clone(&consumer);
            let supervisor = Arc::clone(&supervisor);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(supervisor, shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.dispatched, 1);
        let state = supervisor.publisher().get("slow").await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Completed);
        assert_eq!(runtime.remove_count("slow"), 1);
    }
}
