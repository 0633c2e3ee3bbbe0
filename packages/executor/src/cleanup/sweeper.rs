// packages/executor/src/cleanup/sweeper.rs
//! Periodic reaper of stale containers
//!
//! The sweeper asks the engine, not the pool, which containers exist. Any
//! container carrying the managed label that is older than the retention
//! threshold is force-removed, whether or not this process still tracks it.
//! Removal is idempotent, so racing the supervisor's own cleanup is harmless.

use crate::observability::metric_names;
use crate::runtime::ContainerRuntime;
use crate::utils::config::ExecutorConfig;
use crate::utils::errors::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Label selecting executor-owned containers
    pub label: String,

    /// Age after which a container is reclaimed
    pub retention: Duration,

    pub interval: Duration,
}

impl SweeperConfig {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            label: config.runtime.managed_label.clone(),
            retention: config.cleanup.retention(),
            interval: config.cleanup.interval(),
        }
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Labelled containers listed
    pub seen: usize,

    /// Containers past retention that were removed
    pub removed: usize,

    /// Containers past retention whose removal failed
    pub failed: usize,
}

/// Background cleanup sweeper
pub struct CleanupSweeper {
    config: SweeperConfig,
    runtime: Arc<dyn ContainerRuntime>,
}

impl CleanupSweeper {
    pub fn new(config: SweeperConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { config, runtime }
    }

    /// Run a single pass
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let containers = self.runtime.list(&self.config.label).await?;
        let now = Utc::now();

        let mut report = SweepReport {
            seen: containers.len(),
            ..Default::default()
        };

        for container in containers {
            let age = (now - container.created_at).to_std().unwrap_or_default();
            if age <= self.config.retention {
                continue;
            }

            match self.runtime.remove(&container.id).await {
                Ok(()) => {
                    info!(
                        container = %container.name,
                        age_secs = age.as_secs(),
                        "Sweeper removed stale container"
                    );
                    report.removed += 1;
                }
                Err(e) => {
                    warn!("Sweeper failed to remove {}: {}", container.name, e);
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            metrics::counter!(metric_names::SWEEPER_REMOVED_TOTAL).increment(report.removed as u64);
        }

        debug!(
            seen = report.seen,
            removed = report.removed,
            failed = report.failed,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Sweep now and then every `interval` until `shutdown` fires
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Cleanup sweeper running every {:?} (retention {:?})",
                self.config.interval, self.config.retention
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            warn!("Sweep failed: {}", e);
                        }
                    }
                }
            }

            info!("Cleanup sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    const LABEL: &str = "task-executor.managed";

    fn sweeper(runtime: &MockRuntime, retention: Duration) -> CleanupSweeper {
        CleanupSweeper::new(
            SweeperConfig {
                label: LABEL.to_string(),
                retention,
                interval: Duration::from_millis(20),
            },
            Arc::new(runtime.clone()),
        )
    }

    #[tokio::test]
    async fn test_removes_only_stale_labelled_containers() {
        let runtime = MockRuntime::new();
        let stale = runtime.insert_orphan("old", LABEL, Utc::now() - chrono::Duration::hours(2));
        let fresh = runtime.insert_orphan("new", LABEL, Utc::now());
        let foreign = runtime.insert_orphan("other", "someone.else", Utc::now() - chrono::Duration::hours(2));

        let report = sweeper(&runtime, Duration::from_secs(3600)).sweep_once().await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                seen: 2,
                removed: 1,
                failed: 0
            }
        );
        assert!(!runtime.contains(&stale));
        assert!(runtime.contains(&fresh));
        assert!(runtime.contains(&foreign));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let runtime = MockRuntime::new();
        runtime.insert_orphan("old", LABEL, Utc::now() - chrono::Duration::minutes(5));
        let sweeper = sweeper(&runtime, Duration::from_secs(60));

        assert_eq!(sweeper.sweep_once().await.unwrap().removed, 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_spawned_loop_sweeps_until_shutdown() {
        let runtime = MockRuntime::new();
        let sweeper = Arc::new(sweeper(&runtime, Duration::from_millis(10)));
        let shutdown = CancellationToken::new();
        let task = Arc::clone(&sweeper).spawn(shutdown.clone());

        // appears after the first (immediate) tick and is caught by a later one
        runtime.insert_orphan("late", LABEL, Utc::now() - chrono::Duration::seconds(1));

        for _ in 0..50 {
            if runtime.live_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(runtime.live_count(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }
}
