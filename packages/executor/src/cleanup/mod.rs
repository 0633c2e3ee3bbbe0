// packages/executor/src/cleanup/mod.rs
//! Crash-recovery backstop for leaked containers

pub mod sweeper;

pub use sweeper::{CleanupSweeper, SweepReport, SweeperConfig};
