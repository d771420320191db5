// src/server/admin_api.rs

//! The cluster administration surface: node inventory and explicit node
//! creation. The registration token is returned exactly once, at creation.

use crate::core::XpodError;
use crate::core::registry::NodeType;
use crate::core::state::ServerState;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route(
            "/admin/nodes",
            get(list_nodes).post(create_node).options(preflight),
        )
        .route("/admin/nodes/{node_id}", get(get_node).options(preflight))
        .route(
            "/admin/nodes/{node_id}/capabilities",
            get(node_capabilities).options(preflight),
        )
        .layer(axum::middleware::from_fn(append_cors_headers))
}

const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    ("access-control-allow-methods", "GET, POST, OPTIONS"),
    ("access-control-allow-headers", "authorization, content-type"),
];

async fn preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, CORS_HEADERS)
}

async fn append_cors_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        if let Ok(value) = value.parse() {
            headers.insert(name, value);
        }
    }
    response
}

async fn list_nodes(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let nodes = state.nodes.list_nodes().await?;
    Ok(Json(json!({
        "nodes": nodes,
        "total": nodes.len(),
        "timestamp": Utc::now(),
    })))
}

async fn get_node(
    State(state): State<Arc<ServerState>>,
    Path(node_id): Path<String>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let node = state
        .nodes
        .get_node(&node_id)
        .await?
        .ok_or_else(|| XpodError::NotFound(format!("node '{node_id}'")))?;
    Ok(Json(json!({ "node": node })))
}

/// Stored capabilities, combined with a fresh host probe when the asked-for
/// node is this one.
async fn node_capabilities(
    State(state): State<Arc<ServerState>>,
    Path(node_id): Path<String>,
) -> Result<Json<serde_json::Value>, XpodError> {
    let node = state
        .nodes
        .get_node(&node_id)
        .await?
        .ok_or_else(|| XpodError::NotFound(format!("node '{node_id}'")))?;

    let detected = (node_id == state.node_id).then(detect_host_capabilities);
    Ok(Json(json!({
        "nodeId": node_id,
        "capabilities": node.capabilities,
        "detected": detected,
        "timestamp": Utc::now(),
    })))
}

fn detect_host_capabilities() -> serde_json::Value {
    let mut system = sysinfo::System::new_all();
    system.refresh_all();
    json!({
        "hostname": sysinfo::System::host_name(),
        "os": sysinfo::System::long_os_version(),
        "cpus": system.cpus().len(),
        "totalMemoryBytes": system.total_memory(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateNodeBody {
    #[serde(default)]
    display_name: Option<String>,
}

async fn create_node(
    State(state): State<Arc<ServerState>>,
    body: axum::body::Bytes,
) -> Result<Response, XpodError> {
    let display_name = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<CreateNodeBody>(&body)
            .map_err(|e| XpodError::BadRequest(format!("invalid body: {e}")))?
            .display_name
    };
    let created = state
        .nodes
        .create_node(NodeType::Center, display_name)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "nodeId": created.node_id,
            "token": created.registration_secret,
            "createdAt": created.created_at,
        })),
    )
        .into_response())
}
