// src/core/router/pod_proxy.rs

//! The pod-routing intercept: requests for pods owned by a peer center node
//! are reverse-proxied to that peer.

use super::chain::Intercept;
use super::decision::{self, RouteDecision};
use super::proxy;
use crate::core::XpodError;
use crate::core::directory::PodStore;
use crate::core::metrics;
use crate::core::registry::{NodeConnectivity, NodeStore};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::http::request::Parts;
use axum::response::Response;
use std::sync::Arc;
use tracing::warn;

pub struct PodRoutingHandler {
    enabled: bool,
    my_node_id: String,
    system_prefixes: Vec<String>,
    pods: Arc<dyn PodStore>,
    nodes: Arc<dyn NodeStore>,
    client: reqwest::Client,
}

impl PodRoutingHandler {
    pub fn new(
        enabled: bool,
        my_node_id: String,
        system_prefixes: Vec<String>,
        pods: Arc<dyn PodStore>,
        nodes: Arc<dyn NodeStore>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            enabled,
            my_node_id,
            system_prefixes,
            pods,
            nodes,
            client,
        }
    }

    /// The peer endpoint: the cluster-internal address when the registry has
    /// one, the public endpoint otherwise.
    fn peer_base(connectivity: &NodeConnectivity) -> Result<String, XpodError> {
        if let (Some(ip), Some(port)) = (&connectivity.internal_ip, connectivity.internal_port)
            && !ip.is_empty()
        {
            return Ok(format!("http://{ip}:{port}"));
        }
        if let Some(ip) = &connectivity.public_ip
            && !ip.is_empty()
        {
            return Ok(match connectivity.public_port {
                Some(port) => format!("https://{ip}:{port}"),
                None => format!("https://{ip}"),
            });
        }
        Err(XpodError::UpstreamFailure(format!(
            "node '{}' has no reachable endpoint",
            connectivity.node_id
        )))
    }
}

/// Reconstructs the resource URL the directory stores as a pod's `baseUrl`
/// prefix. The cluster ingress terminates TLS, so the canonical scheme is
/// https unless a forwarded proto says otherwise.
pub(super) fn resource_url(parts: &Parts) -> String {
    let proto = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let host = parts
        .headers
        .get("x-original-host")
        .or_else(|| parts.headers.get(axum::http::header::HOST))
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    format!("{proto}://{host}{}", parts.uri.path())
}

#[async_trait]
impl Intercept for PodRoutingHandler {
    async fn can_handle(&self, parts: &mut Parts) -> bool {
        if !self.enabled {
            return false;
        }
        let url = resource_url(parts);
        let decision = match decision::decide(
            &url,
            parts.uri.path(),
            &self.my_node_id,
            &self.system_prefixes,
            self.pods.as_ref(),
            self.nodes.as_ref(),
        )
        .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!("pod routing lookup for {url} failed: {e}");
                return false;
            }
        };
        let accepted = matches!(decision, RouteDecision::RemotePeer(_));
        parts.extensions.insert(decision);
        accepted
    }

    async fn handle(&self, request: Request<Body>) -> Result<Response, XpodError> {
        let Some(RouteDecision::RemotePeer(connectivity)) =
            request.extensions().get::<RouteDecision>().cloned()
        else {
            return Err(XpodError::Internal(
                "pod routing invoked without a peer decision".to_string(),
            ));
        };
        let base = Self::peer_base(&connectivity)?;
        metrics::PROXIED_REQUESTS_TOTAL.inc();
        proxy::forward(
            &self.client,
            &base,
            &self.my_node_id,
            Some(&connectivity.node_id),
            request,
        )
        .await
    }
}
