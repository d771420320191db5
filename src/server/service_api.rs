// src/server/service_api.rs

//! The supervisor surface: service status, the log ring, and the
//! relaunch-me signal to the parent process.

use crate::core::XpodError;
use crate::core::state::ServerState;
use crate::core::supervisor::LogLevel;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const DEFAULT_LOG_LIMIT: usize = 100;

pub fn routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/service/status", get(service_status))
        .route("/service/logs", get(service_logs))
        .route("/api/admin/restart", post(restart_node))
}

async fn service_status(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    Json(json!({
        "services": state.supervisor.all_status(),
        "timestamp": Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    level: Option<String>,
    source: Option<String>,
    limit: Option<usize>,
}

async fn service_logs(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let level = query
        .level
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            raw.parse::<LogLevel>()
                .map_err(|_| XpodError::BadRequest(format!("unknown log level '{raw}'")))
        })
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let logs = state
        .supervisor
        .logs_tail(level, query.source.as_deref(), limit);
    Ok(Json(json!({ "logs": logs, "total": logs.len() })))
}

/// Signals the parent process with SIGUSR1; the parent treats this as
/// "relaunch me".
async fn restart_node() -> Json<serde_json::Value> {
    let parent = unsafe { libc::getppid() };
    info!("restart requested; signalling parent process {parent} with SIGUSR1");
    unsafe {
        libc::kill(parent, libc::SIGUSR1);
    }
    Json(json!({ "message": "restart requested" }))
}
