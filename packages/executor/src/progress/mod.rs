// packages/executor/src/progress/mod.rs
//! Task state persistence and progress fan-out
//!
//! - **State Store**: authoritative task records and usage counters
//! - **Broadcaster**: per-task best-effort event channels
//! - **Webhook**: single-attempt HTTP callbacks
//! - **Publisher**: the only writer, tying the three together
//!
//! # Architecture
//!
//! ```text
//! Supervisor → update() → StateStore.merge  (source of truth)
//!                              ↓
//!                      Broadcaster.publish  (live observers)
//!                              ↓
//!                   CallbackSink.deliver    (detached, no retry)
//! ```

pub mod broadcaster;
pub mod publisher;
pub mod state_store;
pub mod webhook;

// Re-export commonly used types
pub use broadcaster::ProgressBroadcaster;
pub use publisher::{ProgressPublisher, PublisherConfig};
pub use state_store::{MemoryStateStore, MergeOutcome, StateStore};
pub use webhook::{CallbackSink, HttpCallback};
