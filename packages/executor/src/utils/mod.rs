// packages/executor/src/utils/mod.rs
//! Shared utilities: configuration and error types

pub mod config;
pub mod errors;

pub use config::ExecutorConfig;
pub use errors::{ExecutorError, Result};
