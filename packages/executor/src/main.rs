// packages/executor/src/main.rs
//! Task Executor
//!
//! Reads newline-delimited task envelopes from stdin and runs each one in
//! its own container. Stops on EOF or Ctrl-C after in-flight tasks finish.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use task_executor::cleanup::{CleanupSweeper, SweeperConfig};
use task_executor::executor::{ExecutionSupervisor, SupervisorConfig};
use task_executor::observability::{init_metrics, init_tracing};
use task_executor::progress::{HttpCallback, MemoryStateStore, ProgressPublisher, PublisherConfig};
use task_executor::queue::{LineQueue, QueueConsumer};
use task_executor::runtime::{ContainerPool, ContainerPoolConfig, DockerRuntime, SandboxConfig};
use task_executor::tools::ToolRegistry;
use task_executor::utils::config::ExecutorConfig;
use task_executor::BuildInfo;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = ExecutorConfig::load().context("failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(config.observability.log_format)?;
    init_metrics(config.observability.metrics_addr.as_deref())?;

    info!("Starting Task Executor {}", BuildInfo::current());
    info!("Configuration loaded: {:?}", config);

    let runtime = Arc::new(DockerRuntime::new(config.runtime.docker_binary.clone()));

    let pool = Arc::new(ContainerPool::new(
        ContainerPoolConfig {
            max_containers: config.runtime.max_containers,
            keep_workspaces: config.runtime.keep_workspaces,
            sandbox: SandboxConfig::from_config(&config),
        },
        runtime.clone(),
    ));

    let callback = HttpCallback::new(Duration::from_millis(config.callback.timeout_ms))?;
    let publisher = Arc::new(
        ProgressPublisher::new(Arc::new(MemoryStateStore::new(config.state.key_prefix.clone())))
            .with_config(PublisherConfig {
                token_prefix_len: config.usage.token_prefix_len,
            })
            .with_callback(Arc::new(callback)),
    );

    let supervisor = Arc::new(ExecutionSupervisor::new(
        SupervisorConfig::from_config(&config),
        Arc::clone(&pool),
        publisher,
        Arc::new(ToolRegistry::with_builtins()),
    ));

    let shutdown = CancellationToken::new();

    let sweeper = Arc::new(CleanupSweeper::new(SweeperConfig::from_config(&config), runtime));
    let sweeper_task = sweeper.spawn(shutdown.clone());

    // Graceful shutdown handler
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal, finishing in-flight tasks..."),
                Err(e) => error!("Failed to install Ctrl-C handler: {}", e),
            }
            shutdown.cancel();
        });
    }

    info!(
        "Consuming tasks for queue '{}' from stdin ({} containers max)",
        config.queue.name, config.runtime.max_containers
    );
    let consumer = QueueConsumer::new(Arc::new(LineQueue::stdin()), config.max_in_flight());
    let outcome = consumer.run(supervisor, shutdown.clone()).await;

    let stats = pool.stats();
    info!(
        active = stats.active_containers,
        available = stats.available_slots,
        "Container pool drained"
    );

    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        error!("Sweeper task failed: {}", e);
    }

    match outcome {
        Ok(report) => {
            info!(
                "Executor stopped gracefully ({} tasks dispatched, {} malformed)",
                report.dispatched, report.malformed
            );
            Ok(())
        }
        Err(e) => {
            error!("Executor error: {}", e);
            Err(e.into())
        }
    }
}
