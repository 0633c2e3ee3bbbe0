// packages/executor/src/queue/mod.rs
//! Inbound work queue
//!
//! Messages are removed from the queue on receipt (at-most-once). A crash
//! between dequeue and completion loses the task; nothing re-delivers it.

pub mod consumer;
pub mod line;
pub mod memory;

use crate::utils::errors::Result;
use async_trait::async_trait;

/// Source of raw task messages
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Block until a message is available and remove it.
    /// Returns `QueueClosed` once no message will ever arrive.
    async fn next(&self) -> Result<Vec<u8>>;

    /// Enqueue a raw message
    async fn push(&self, message: Vec<u8>) -> Result<()>;
}

// Re-export commonly used types
pub use consumer::{ConsumerReport, QueueConsumer};
pub use line::LineQueue;
pub use memory::MemoryQueue;
