// packages/executor/src/queue/memory.rs
//! In-process unbounded task queue
//!
//! Lock-free `SegQueue` for storage, `Notify` to park the consumer while the
//! queue is empty.

use crate::queue::TaskQueue;
use crate::utils::errors::{ExecutorError, Result};
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// In-memory task queue
#[derive(Default)]
pub struct MemoryQueue {
    messages: SegQueue<Vec<u8>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to pop a message (non-blocking)
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.messages.pop()
    }

    /// Stop accepting messages. Remaining messages are still delivered,
    /// after which `next` returns `QueueClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn next(&self) -> Result<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent push/close is not missed
            notified.as_mut().enable();

            if let Some(message) = self.try_pop() {
                return Ok(message);
            }
            if self.is_closed() {
                return Err(ExecutorError::QueueClosed);
            }

            notified.await;
        }
    }

    async fn push(&self, message: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(ExecutorError::QueueClosed);
        }

        self.messages.push(message);
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_then_next() {
        let queue = MemoryQueue::new();
        queue.push(b"one".to_vec()).await.unwrap();
        queue.push(b"two".to_vec()).await.unwrap();

        assert_eq!(queue.next().await.unwrap(), b"one");
        assert_eq!(queue.next().await.unwrap(), b"two");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_blocks_until_push() {
        let queue = Arc::new(MemoryQueue::new());

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        queue.push(b"late".to_vec()).await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), b"late");
    }

    #[tokio::test]
    async fn test_close_drains_then_reports_closed() {
        let queue = MemoryQueue::new();
        queue.push(b"last".to_vec()).await.unwrap();
        queue.close();

        assert!(queue.push(b"rejected".to_vec()).await.is_err());
        assert_eq!(queue.next().await.unwrap(), b"last");
        assert!(matches!(queue.next().await, Err(ExecutorError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_reader() {
        let queue = Arc::new(MemoryQueue::new());

        let reader = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert!(matches!(reader.await.unwrap(), Err(ExecutorError::QueueClosed)));
    }
}
