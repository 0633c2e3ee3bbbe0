// packages/executor/src/tools/mod.rs
//! Tool capability registry
//!
//! Tools are registered by name at startup and resolved by lookup. The
//! supervisor checks requested names before provisioning a container; the
//! in-container entrypoint runs them.

pub mod builtin;
pub mod registry;

// Re-export commonly used types
pub use builtin::EchoTool;
pub use registry::{Tool, ToolRegistry};
