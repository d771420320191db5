// src/server/spawner.rs

//! Spawns all of the node's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Spawns all critical background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if state.config.metrics.enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Heartbeat ---
    let registration = Arc::clone(&state.registration);
    let shutdown_rx_heartbeat = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        registration.run_heartbeat(shutdown_rx_heartbeat).await;
        Ok(())
    });

    // --- Supervised services ---
    for service in &state.config.supervisor.services {
        if service.autostart {
            if let Err(e) = state.supervisor.start(&service.name).await {
                warn!("autostart of service '{}' failed: {e}", service.name);
            }
        } else {
            info!("service '{}' registered without autostart", service.name);
        }
    }

    Ok(())
}
