//! arha Control Plane
//!
//! Admits agents onto service instances, deploys new instances when capacity
//! runs short, and re-homes agents when nodes or pods fail.

use std::sync::Arc;

use anyhow::{Context, Result};
use arha_control_plane::{
    agent::HttpAgentChannel,
    api, config,
    controller::{Collaborators, Controller},
    health::HttpNodeHealth,
    inventory::NodeInventory,
    launcher::MockLauncher,
    scheduler::NodeHealthWorker,
    state::AppState,
    store::FileStore,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ARHA_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting arha control plane");
    info!(
        listen_addr = %config.listen_addr,
        state_dir = %config.state_dir.display(),
        optimizer = %config.planner.strategy,
        ports = %config.planner.ports,
        "Configuration loaded"
    );

    let inventory = match &config.node_inventory {
        Some(path) => NodeInventory::load(path)?,
        None => {
            warn!("ARHA_NODE_INVENTORY not set; no node can be used for placement");
            NodeInventory::new()
        }
    };

    let mut launcher = MockLauncher::new();
    for node in inventory.node_names() {
        if let Some(address) = inventory.address(node) {
            launcher = launcher.with_host_address(node, address);
        }
    }
    warn!("No orchestrator binding configured, using mock launcher");

    let health = HttpNodeHealth::from_inventory(&inventory, config.health_port, config.health_timeout)?;
    let agents = HttpAgentChannel::new(config.agent_timeout)?;
    let store = FileStore::new(&config.state_dir);

    let controller = Arc::new(Controller::new(
        Collaborators {
            store: Arc::new(store),
            launcher: Arc::new(launcher),
            health: Arc::new(health),
            agents: Arc::new(agents),
        },
        inventory,
        config.planner,
    ));

    match controller.refresh_node_status().await {
        Ok(statuses) => info!(nodes = statuses.len(), "Initial node health collected"),
        Err(e) => warn!(error = %e, "Initial node health check failed"),
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_worker = NodeHealthWorker::new(controller.clone(), config.health_interval);
    let health_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            health_worker.run(shutdown_rx).await;
        }
    });

    let app = api::create_router(AppState::new(controller));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, health_handle).await {
        warn!(error = %e, "Node health worker did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
