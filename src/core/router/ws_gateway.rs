// src/core/router/ws_gateway.rs

//! The cluster WebSocket gateway. Runs ahead of the router chain for upgrade
//! requests addressed to node subdomains: direct-mode edges get a 307 to
//! their public endpoint, proxy-mode edges are tunneled through their
//! registered entrypoint.

use super::edge::{DIRECT_NODE_HEADER, public_authority};
use crate::core::XpodError;
use crate::core::metrics;
use crate::core::registry::{AccessMode, NodeStore};
use axum::extract::FromRequestParts;
use axum::extract::ws::{Message as ClientMessage, WebSocket, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TunnelMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

pub const PROXY_NODE_HEADER: &str = "x-xpod-proxy-node";

pub struct ClusterWsGateway {
    ingress_domain: String,
    nodes: Arc<dyn NodeStore>,
}

impl ClusterWsGateway {
    pub fn new(ingress_domain: String, nodes: Arc<dyn NodeStore>) -> Self {
        Self {
            ingress_domain,
            nodes,
        }
    }

    /// Serves an upgrade request addressed to a node subdomain, or returns
    /// `None` so the rest of the handler stack can run (requests on the
    /// ingress domain itself, hostnames outside the cluster suffix, unknown
    /// node labels with extra dots).
    pub async fn try_handle(&self, parts: &mut Parts) -> Option<Response> {
        if !is_websocket_upgrade(parts) || self.ingress_domain.is_empty() {
            return None;
        }

        let hostname = request_hostname(parts)?;
        if hostname == self.ingress_domain {
            return None;
        }
        let suffix = format!(".{}", self.ingress_domain);
        let label = hostname.strip_suffix(&suffix)?;
        if label.is_empty() || label.contains('.') {
            return None;
        }

        let node = match self.nodes.find_node_by_subdomain(label).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                debug!("upgrade for unknown node subdomain '{label}'");
                return Some(StatusCode::NOT_FOUND.into_response());
            }
            Err(e) => {
                warn!("node lookup for subdomain '{label}' failed: {e}");
                return Some(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        match node.access_mode {
            AccessMode::Direct if node.public_ip.as_deref().is_some_and(|ip| !ip.is_empty()) => {
                let authority = public_authority(
                    node.public_ip.as_deref().unwrap_or_default(),
                    node.public_port,
                );
                metrics::EDGE_REDIRECTS_TOTAL.inc();
                Some(
                    (
                        StatusCode::TEMPORARY_REDIRECT,
                        [
                            (header::LOCATION.as_str(), format!("wss://{authority}{path_and_query}")),
                            (DIRECT_NODE_HEADER, node.node_id.clone()),
                        ],
                    )
                        .into_response(),
                )
            }
            AccessMode::Proxy => {
                Some(
                    self.tunnel(parts, &hostname, &node.node_id, &node.metadata, &path_and_query)
                        .await,
                )
            }
            _ => Some(StatusCode::BAD_REQUEST.into_response()),
        }
    }

    /// Proxies the upgrade through the edge's tunnel entrypoint.
    async fn tunnel(
        &self,
        parts: &mut Parts,
        hostname: &str,
        node_id: &str,
        metadata: &serde_json::Value,
        path_and_query: &str,
    ) -> Response {
        let Some(entrypoint) = tunnel_entrypoint(metadata) else {
            warn!("proxy-mode node '{node_id}' has no tunnel entrypoint");
            return StatusCode::BAD_GATEWAY.into_response();
        };
        let upstream_url = match upstream_ws_url(&entrypoint, path_and_query) {
            Ok(url) => url,
            Err(e) => {
                warn!("bad tunnel entrypoint '{entrypoint}' for node '{node_id}': {e}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        let upgrade = match WebSocketUpgrade::from_request_parts(parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };

        let ws_scheme = if upstream_url.starts_with("wss:") { "wss" } else { "ws" };
        let mut upstream_request = match upstream_url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                warn!("cannot build tunnel handshake for '{upstream_url}': {e}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };
        insert_forwarded_headers(&mut upstream_request, hostname, ws_scheme, node_id);

        let (upstream, _) = match connect_async(upstream_request).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("tunnel connect to '{upstream_url}' for node '{node_id}' failed: {e}");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };

        metrics::TUNNELED_UPGRADES_TOTAL.inc();
        let node = node_id.to_string();
        upgrade
            .on_upgrade(move |client| async move {
                pump(client, upstream).await;
                debug!("tunnel for node '{node}' closed");
            })
            .into_response()
    }
}

fn is_websocket_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn request_hostname(parts: &Parts) -> Option<String> {
    let raw = parts
        .headers
        .get("x-original-host")
        .or_else(|| parts.headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())?;
    let hostname = raw.split(':').next().unwrap_or(raw);
    (!hostname.is_empty()).then(|| hostname.to_ascii_lowercase())
}

/// `metadata.tunnel.entrypoint`, falling back to `metadata.publicAddress`.
fn tunnel_entrypoint(metadata: &serde_json::Value) -> Option<String> {
    metadata
        .pointer("/tunnel/entrypoint")
        .or_else(|| metadata.get("publicAddress"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rewrites an http(s) entrypoint into the ws(s) URL for this upgrade.
fn upstream_ws_url(entrypoint: &str, path_and_query: &str) -> Result<String, XpodError> {
    let parsed = Url::parse(entrypoint)?;
    let scheme = match parsed.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(XpodError::BadRequest(format!(
                "unsupported tunnel scheme '{other}'"
            )));
        }
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| XpodError::BadRequest("tunnel entrypoint has no host".to_string()))?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(format!("{scheme}://{authority}{path_and_query}"))
}

fn insert_forwarded_headers(
    request: &mut tokio_tungstenite::tungstenite::handshake::client::Request,
    hostname: &str,
    ws_scheme: &str,
    node_id: &str,
) {
    let headers = request.headers_mut();
    if let Ok(value) = hostname.parse() {
        headers.insert("x-forwarded-host", value);
    }
    if let Ok(value) = ws_scheme.parse() {
        headers.insert("x-forwarded-proto", value);
    }
    if let Ok(value) = node_id.parse() {
        headers.insert(PROXY_NODE_HEADER, value);
    }
}

/// Pumps frames between the client socket and the tunnel until either side
/// closes or errors.
async fn pump(client: WebSocket, upstream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    let (mut client_sink, mut client_stream) = client.split();
    let (mut upstream_sink, mut upstream_stream) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_stream.next().await {
            let Some(outbound) = client_to_tunnel(message) else {
                break;
            };
            if upstream_sink.send(outbound).await.is_err() {
                break;
            }
        }
        let _ = upstream_sink.close().await;
    };
    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_stream.next().await {
            let Some(outbound) = tunnel_to_client(message) else {
                break;
            };
            if client_sink.send(outbound).await.is_err() {
                break;
            }
        }
        let _ = client_sink.close().await;
    };

    tokio::join!(client_to_upstream, upstream_to_client);
}

fn client_to_tunnel(message: ClientMessage) -> Option<TunnelMessage> {
    match message {
        ClientMessage::Text(text) => Some(TunnelMessage::text(text.to_string())),
        ClientMessage::Binary(data) => Some(TunnelMessage::binary(data)),
        ClientMessage::Ping(data) => Some(TunnelMessage::Ping(data)),
        ClientMessage::Pong(data) => Some(TunnelMessage::Pong(data)),
        ClientMessage::Close(_) => None,
    }
}

fn tunnel_to_client(message: TunnelMessage) -> Option<ClientMessage> {
    match message {
        TunnelMessage::Text(text) => Some(ClientMessage::Text(text.as_str().into())),
        TunnelMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        TunnelMessage::Ping(data) => Some(ClientMessage::Ping(data)),
        TunnelMessage::Pong(data) => Some(ClientMessage::Pong(data)),
        TunnelMessage::Close(_) | TunnelMessage::Frame(_) => None,
    }
}
