// src/server/connection_loop.rs

//! Contains the main serve loop and graceful shutdown handling.

use super::context::ServerContext;
use super::http;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

/// Waits for a shutdown signal: SIGINT or SIGTERM.
async fn await_shutdown_signal() {
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT stream");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM stream");

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
}

/// The main loop: serves HTTP until a shutdown signal arrives, then tears the
/// node down, stopping supervised children and hard-killing stragglers.
pub async fn run(ctx: ServerContext) {
    let ServerContext {
        state,
        listener,
        shutdown_tx,
        mut background_tasks,
    } = ctx;

    let app = http::build_app(state.clone());
    let mut serve_shutdown_rx = shutdown_tx.subscribe();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = serve_shutdown_rx.recv().await;
    })
    .into_future();
    tokio::pin!(server);

    let mut server_finished = false;
    loop {
        tokio::select! {
            biased; // Prioritize shutdown signals over other events.

            _ = await_shutdown_signal() => {
                break;
            },

            // Monitor background tasks for unexpected termination.
            Some(result) = background_tasks.join_next() => {
                match result {
                    Ok(Ok(())) => info!("A background task has completed."),
                    Ok(Err(e)) => error!("A background task failed: {e}"),
                    Err(e) => error!("A background task panicked: {e}"),
                }
            },

            result = &mut server => {
                if let Err(e) = result {
                    error!("HTTP server error: {e}");
                }
                server_finished = true;
                break;
            },
        }
    }

    // Stop accepting traffic and wind down the background tasks.
    let _ = shutdown_tx.send(());
    if !server_finished
        && tokio::time::timeout(Duration::from_secs(5), &mut server)
            .await
            .is_err()
    {
        warn!("HTTP server did not drain within 5s");
    }

    // Stop supervised children, then sweep whatever survived.
    state.supervisor.set_shutting_down();
    state.supervisor.stop_all();
    tokio::time::sleep(Duration::from_millis(500)).await;
    state.supervisor.kill_all_now();

    background_tasks.shutdown().await;
    info!("shutdown complete");
}
