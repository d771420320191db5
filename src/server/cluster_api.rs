// src/server/cluster_api.rs

//! The migration surface: pod inventory, the migrate call, and staged
//! migration status/cancellation.

use crate::core::XpodError;
use crate::core::state::ServerState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/.cluster/pods", get(list_pods))
        .route("/.cluster/pods/{pod_id}", get(get_pod))
        .route("/.cluster/pods/{pod_id}/migrate", axum::routing::post(migrate_pod))
        .route(
            "/.cluster/pods/{pod_id}/migration",
            get(migration_status).delete(cancel_migration),
        )
}

async fn list_pods(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let pods = state.pods.list_all().await?;
    Ok(Json(json!({ "pods": pods })))
}

async fn get_pod(
    State(state): State<Arc<ServerState>>,
    Path(pod_id): Path<String>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let pod = state
        .pods
        .find_by_id(&pod_id)
        .await?
        .ok_or_else(|| XpodError::NotFound(format!("pod '{pod_id}'")))?;
    Ok(Json(json!({ "pod": pod })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MigrateBody {
    target_node: String,
}

async fn migrate_pod(
    State(state): State<Arc<ServerState>>,
    Path(pod_id): Path<String>,
    Json(body): Json<MigrateBody>,
) -> Response {
    match state
        .migration
        .migrate_pod(&pod_id, &body.target_node)
        .await
    {
        Ok(outcome) => Json(json!({
            "message": "pod migrated",
            "podId": outcome.pod_id,
            "sourceNode": outcome.source_node,
            "targetNode": outcome.target_node,
            "migratedAt": outcome.migrated_at,
        }))
        .into_response(),
        Err(XpodError::AlreadyOnTarget) => (
            axum::http::StatusCode::BAD_REQUEST,
            Json(json!({ "error": "already on node" })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn migration_status(
    State(state): State<Arc<ServerState>>,
    Path(pod_id): Path<String>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let status = state.migration.status(&pod_id).await?;
    Ok(Json(json!({
        "podId": pod_id,
        "status": status.status,
        "targetNode": status.target_node,
        "progress": status.progress,
    })))
}

async fn cancel_migration(
    State(state): State<Arc<ServerState>>,
    Path(pod_id): Path<String>,
) -> Result<Json<serde_json::Value>, XpodError> {
    state.migration.cancel(&pod_id)?;
    Ok(Json(json!({
        "podId": pod_id,
        "message": "cancellation requested",
    })))
}
