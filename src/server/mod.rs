// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod admin_api;
mod cluster_api;
mod connection_loop;
mod context;
mod http;
mod initialization;
mod metrics_server;
mod service_api;
mod spawner;

/// The main node startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize node state, stores, registration, and the listener.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Serve HTTP until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
