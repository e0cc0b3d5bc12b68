//! Prover allocator
//!
//! Polls the demand oracle every few seconds and switches the fleet between
//! prover 1, prover 2, or a split of both.
//!
//! ## Architecture
//!
//! - **Demand Poller**: Queries the oracle and picks a target allocation
//! - **Allocation Controller**: Serializes transitions and owns the state
//! - **Fleet Executor**: Fans node commands out concurrently
//! - **Runner**: Executes `docker compose` over ssh

use std::sync::Arc;

use anyhow::{Context, Result};
use prover_allocator::config::{Config, LogFormat};
use prover_allocator::oracle::HttpDemandOracle;
use prover_allocator::{AllocationController, DemandPoller, PollerConfig, SshRunner};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        nodes = config.nodes.len(),
        ssh_user = %config.ssh_user,
        api_endpoint = %config.oracle.api_endpoint,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = Arc::new(SshRunner::new(config.ssh_user.clone()));
    let controller = Arc::new(AllocationController::new(
        config.nodes.clone(),
        runner,
        config.workload_dirs.clone(),
    ));
    let oracle = Arc::new(
        HttpDemandOracle::new(&config.oracle).context("failed to build oracle client")?,
    );

    let poller = DemandPoller::new(oracle, controller, PollerConfig::default());
    let mut poller_handle = tokio::spawn(async move {
        poller.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            // An in-flight transition runs to completion before the loop exits.
            if let Err(e) = (&mut poller_handle).await {
                error!(error = %e, "Poller task panicked");
            }
        }
        result = &mut poller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Poller task panicked");
            }
        }
    }

    info!("Allocator shutdown complete");
    Ok(())
}
