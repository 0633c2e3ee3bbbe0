// packages/executor/src/task/mod.rs
//! Task data model
//!
//! - **Envelope**: immutable work description consumed from the queue
//! - **State**: persisted status/progress record, merged from partial updates

pub mod envelope;
pub mod state;

pub use envelope::TaskEnvelope;
pub use state::{ProgressUpdate, TaskState, TaskStatus};
