// src/core/router/proxy.rs

//! Shared HTTP forwarding plumbing for the pod router and the local
//! data-plane leg. No retries: an upstream failure surfaces to the caller.

use crate::core::XpodError;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{HeaderName, HeaderValue, HOST, TRANSFER_ENCODING};
use axum::http::{Method, Request};
use axum::response::Response;
use std::net::SocketAddr;
use tracing::debug;

pub const SOURCE_NODE_HEADER: &str = "x-xpod-source-node";
pub const PROXIED_FROM_HEADER: &str = "x-xpod-proxied-from";

/// Forwards `request` to `base` (scheme + authority, no trailing slash),
/// appending the inbound path and query. The response is streamed back with
/// its status and headers, minus chunked transfer encoding, plus
/// `X-Xpod-Proxied-From` when `proxied_from` is given.
pub async fn forward(
    client: &reqwest::Client,
    base: &str,
    source_node: &str,
    proxied_from: Option<&str>,
    request: Request<Body>,
) -> Result<Response, XpodError> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let downstream = format!("{base}{path_and_query}");
    debug!("proxying {} {} -> {downstream}", parts.method, parts.uri);

    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let proto = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();
    let port = host
        .rsplit_once(':')
        .map(|(_, p)| p.to_string())
        .unwrap_or_else(|| if proto == "https" { "443".into() } else { "80".into() });

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if name == HOST {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    if !host.is_empty() {
        headers.insert("x-forwarded-host", header_value(&host)?);
    }
    headers.insert("x-forwarded-proto", header_value(&proto)?);
    headers.insert("x-forwarded-port", header_value(&port)?);
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        let chained = match parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {}", addr.ip()),
            None => addr.ip().to_string(),
        };
        headers.insert("x-forwarded-for", header_value(&chained)?);
    }
    headers.insert(SOURCE_NODE_HEADER, header_value(source_node)?);

    let mut builder = client
        .request(parts.method.clone(), &downstream)
        .headers(headers);
    if parts.method != Method::GET && parts.method != Method::HEAD {
        builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = builder
        .send()
        .await
        .map_err(|e| XpodError::UpstreamFailure(format!("fetch of {downstream} failed: {e}")))?;

    let mut response = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers().iter() {
        if name == TRANSFER_ENCODING
            && value
                .to_str()
                .is_ok_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            continue;
        }
        response = response.header(name.clone(), value.clone());
    }
    if let Some(peer) = proxied_from {
        response = response.header(
            HeaderName::from_static(PROXIED_FROM_HEADER),
            header_value(peer)?,
        );
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| XpodError::Internal(format!("failed to assemble proxied response: {e}")))
}

fn header_value(raw: &str) -> Result<HeaderValue, XpodError> {
    HeaderValue::from_str(raw)
        .map_err(|_| XpodError::BadRequest(format!("header value '{raw}' is not representable")))
}
