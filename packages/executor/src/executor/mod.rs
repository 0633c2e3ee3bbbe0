// packages/executor/src/executor/mod.rs
//! Task execution
//!
//! - **Supervisor**: per-task state machine over the pool and publisher
//! - **Workspace**: task input and result artifact files

pub mod supervisor;
pub mod workspace;

// Re-export commonly used types
pub use supervisor::{ExecutionPhase, ExecutionSupervisor, SupervisorConfig};
