// src/server/http.rs

//! Assembles the axum application: the administration surfaces plus the
//! routing fallback every other request flows through.

use super::{admin_api, cluster_api, service_api};
use crate::core::XpodError;
use crate::core::state::ServerState;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub fn build_app(state: Arc<ServerState>) -> Router {
    Router::new()
        .merge(admin_api::routes())
        .merge(cluster_api::routes())
        .merge(service_api::routes())
        .fallback(route_request)
        .with_state(state)
}

/// The routing fallback: WebSocket upgrades for node subdomains go through
/// the cluster gateway first; everything else runs the handler chain, ending
/// at the local data-plane.
async fn route_request(
    State(state): State<Arc<ServerState>>,
    request: Request<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    if let Some(response) = state.ws_gateway.try_handle(&mut parts).await {
        return response;
    }

    let request = Request::from_parts(parts, body);
    match state.router.run(request).await {
        Ok(Some(response)) => response,
        Ok(None) => XpodError::NotFound("no handler matched".to_string()).into_response(),
        Err(e) => e.into_response(),
    }
}
