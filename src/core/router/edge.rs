// src/core/router/edge.rs

//! The edge-direct intercept: pods owned by an internet-reachable edge get a
//! 307 redirect to the edge's public endpoint. Proxy-mode edges are declined
//! here; their HTTP traffic belongs to the L4 SNI proxy in front of the
//! cluster.

use super::chain::Intercept;
use super::decision::{self, RouteDecision};
use super::pod_proxy::resource_url;
use crate::core::XpodError;
use crate::core::directory::PodStore;
use crate::core::metrics;
use crate::core::registry::NodeStore;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use std::sync::Arc;
use tracing::warn;

pub const DIRECT_NODE_HEADER: &str = "x-xpod-direct-node";

pub struct EdgeDirectHandler {
    enabled: bool,
    my_node_id: String,
    system_prefixes: Vec<String>,
    pods: Arc<dyn PodStore>,
    nodes: Arc<dyn NodeStore>,
}

impl EdgeDirectHandler {
    pub fn new(
        enabled: bool,
        my_node_id: String,
        system_prefixes: Vec<String>,
        pods: Arc<dyn PodStore>,
        nodes: Arc<dyn NodeStore>,
    ) -> Self {
        Self {
            enabled,
            my_node_id,
            system_prefixes,
            pods,
            nodes,
        }
    }
}

/// `{host}[:{port}]`, the port omitted when it is the https default.
pub(super) fn public_authority(ip: &str, port: Option<u16>) -> String {
    match port {
        Some(443) | None => ip.to_string(),
        Some(port) => format!("{ip}:{port}"),
    }
}

#[async_trait]
impl Intercept for EdgeDirectHandler {
    async fn can_handle(&self, parts: &mut Parts) -> bool {
        if !self.enabled {
            return false;
        }
        // The pod-routing handler usually ran first and stashed the decision.
        if let Some(decision) = parts.extensions.get::<RouteDecision>() {
            return matches!(decision, RouteDecision::EdgeDirect(_));
        }
        let url = resource_url(parts);
        match decision::decide(
            &url,
            parts.uri.path(),
            &self.my_node_id,
            &self.system_prefixes,
            self.pods.as_ref(),
            self.nodes.as_ref(),
        )
        .await
        {
            Ok(decision) => {
                let accepted = matches!(decision, RouteDecision::EdgeDirect(_));
                parts.extensions.insert(decision);
                accepted
            }
            Err(e) => {
                warn!("edge routing lookup for {url} failed: {e}");
                false
            }
        }
    }

    async fn handle(&self, request: Request<Body>) -> Result<Response, XpodError> {
        let Some(RouteDecision::EdgeDirect(connectivity)) =
            request.extensions().get::<RouteDecision>().cloned()
        else {
            return Err(XpodError::Internal(
                "edge redirect invoked without an edge decision".to_string(),
            ));
        };
        let Some(public_ip) = connectivity.public_ip.as_deref().filter(|ip| !ip.is_empty())
        else {
            return Err(XpodError::UpstreamFailure(format!(
                "direct-mode node '{}' has no public endpoint",
                connectivity.node_id
            )));
        };

        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let location = format!(
            "https://{}{path_and_query}",
            public_authority(public_ip, connectivity.public_port)
        );

        metrics::EDGE_REDIRECTS_TOTAL.inc();
        Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(header::LOCATION, location)
            .header(DIRECT_NODE_HEADER, connectivity.node_id)
            .body(Body::empty())
            .map_err(|e| XpodError::Internal(format!("failed to assemble redirect: {e}")))
    }
}
