//! fnagent Node Agent
//!
//! Keeps the host's local image cache within its disk budget while function
//! invocations pull and run images.
//!
//! ## Architecture
//!
//! - **Seeding**: Registers images already present in the runtime at startup
//! - **Reclaim Loop**: Evicts idle images whenever the cache is over capacity,
//!   woken by seeding and lease changes as well as on an interval
//! - **Leases**: Pin images for running containers
//! - **Runtime**: Deletes evicted images (Docker in prod, mock in dev)

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fnagent_node_agent::{Agent, Config, DockerClient, ImageRuntime, MockRuntime, RuntimeKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("FNAGENT_LOG_LEVEL").unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fnagent node agent");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        runtime = ?config.runtime,
        max_cache_bytes = config.cache.max_size_bytes,
        reclaim_interval_secs = config.reclaim_interval_secs,
        "Configuration loaded"
    );

    match config.runtime {
        RuntimeKind::Docker => {
            let docker = DockerClient::new(&config.docker_socket);
            if !docker.socket_exists() {
                warn!(socket = %config.docker_socket, "Docker socket not found");
            }
            run(config, Arc::new(docker)).await
        }
        RuntimeKind::Mock => run(config, Arc::new(MockRuntime::new())).await,
    }
}

async fn run<R: ImageRuntime + 'static>(config: Config, runtime: Arc<R>) -> Result<()> {
    let agent = Agent::new(&config.cache, runtime.clone());

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the reclaim loop
    let reclaim_handle = agent.spawn_reclaim_loop(config.reclaim_interval(), shutdown_rx);

    if config.seed_from_runtime {
        if let Err(e) = agent.seed(runtime.as_ref()).await {
            warn!(error = %e, "Failed to seed image cache from runtime");
        }
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = reclaim_handle => {
            match result {
                Ok(()) => info!("Reclaim loop exited"),
                Err(e) => error!(error = %e, "Reclaim task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    let stats = agent.cache().stats().await;
    info!(
        images = stats.entries,
        size = stats.current_size_bytes,
        evictions = stats.evictions,
        removal_failures = stats.removal_failures,
        "Node agent shutdown complete"
    );
    Ok(())
}
