// src/server/initialization.rs

//! Handles the complete node initialization process, from state construction
//! to binding the listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;
use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all node components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = ServerState::initialize(config).await?;
    info!(
        "node state initialized; this is node '{}' ({} supervised services)",
        state.node_id,
        state.config.supervisor.services.len()
    );

    if state.config.cluster.enabled {
        info!(
            "pod routing ENABLED; cluster ingress domain '{}'",
            state.config.cluster.ingress_domain
        );
    } else {
        info!("pod routing DISABLED; every request is served locally");
    }

    let listener = TcpListener::bind((state.config.host.as_str(), state.config.port)).await?;
    info!(
        "xpod gateway listening on {}:{}",
        state.config.host, state.config.port
    );

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!("xpod {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "state root '{}', data-plane at {}",
        config.node.root_file_path, config.node.data_plane_addr
    );
}
