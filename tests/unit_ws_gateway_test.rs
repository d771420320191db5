use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use xpod::core::registry::{
    AccessMode, ConnectivityStatus, MemoryNodeStore, NodeModePatch, NodeStore, NodeType,
};
use xpod::core::router::ClusterWsGateway;

const INGRESS: &str = "cluster.example.com";

fn upgrade_parts(host: &str, path: &str) -> Parts {
    let (parts, _body) = Request::builder()
        .uri(path)
        .header("host", host)
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
        .into_parts();
    parts
}

async fn gateway_with_edge(mode: AccessMode) -> (ClusterWsGateway, String) {
    let nodes = Arc::new(MemoryNodeStore::new());
    let edge = nodes.create_node(NodeType::Edge, None).await.unwrap();
    nodes
        .update_node_mode(
            &edge.node_id,
            NodeModePatch {
                access_mode: mode,
                public_ip: Some("203.0.113.10".to_string()),
                public_port: Some(8443),
                subdomain: Some("n1".to_string()),
                connectivity_status: Some(ConnectivityStatus::Reachable),
                capabilities: None,
            },
        )
        .await
        .unwrap();
    (
        ClusterWsGateway::new(INGRESS.to_string(), nodes as Arc<dyn NodeStore>),
        edge.node_id,
    )
}

#[tokio::test]
async fn direct_mode_upgrade_redirects_to_public_endpoint() {
    let (gateway, node_id) = gateway_with_edge(AccessMode::Direct).await;
    let mut parts = upgrade_parts("n1.cluster.example.com", "/test");

    let response = gateway.try_handle(&mut parts).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "wss://203.0.113.10:8443/test"
    );
    assert_eq!(
        response.headers().get("x-xpod-direct-node").unwrap(),
        node_id.as_str()
    );
}

#[tokio::test]
async fn default_port_is_omitted_from_the_redirect() {
    let nodes = Arc::new(MemoryNodeStore::new());
    let edge = nodes.create_node(NodeType::Edge, None).await.unwrap();
    nodes
        .update_node_mode(
            &edge.node_id,
            NodeModePatch {
                access_mode: AccessMode::Direct,
                public_ip: Some("203.0.113.10".to_string()),
                public_port: Some(443),
                subdomain: Some("n1".to_string()),
                ..NodeModePatch::default()
            },
        )
        .await
        .unwrap();
    let gateway = ClusterWsGateway::new(INGRESS.to_string(), nodes as Arc<dyn NodeStore>);

    let mut parts = upgrade_parts("n1.cluster.example.com", "/ws?x=1");
    let response = gateway.try_handle(&mut parts).await.unwrap();
    assert_eq!(
        response.headers().get("location").unwrap(),
        "wss://203.0.113.10/ws?x=1"
    );
}

#[tokio::test]
async fn ingress_domain_and_foreign_hosts_are_declined() {
    let (gateway, _) = gateway_with_edge(AccessMode::Direct).await;

    let mut parts = upgrade_parts(INGRESS, "/ws");
    assert!(gateway.try_handle(&mut parts).await.is_none());

    let mut parts = upgrade_parts("other.example.org", "/ws");
    assert!(gateway.try_handle(&mut parts).await.is_none());

    // Extra label depth under the cluster suffix is rejected back to the
    // regular handler stack.
    let mut parts = upgrade_parts("deep.n1.cluster.example.com", "/ws");
    assert!(gateway.try_handle(&mut parts).await.is_none());
}

#[tokio::test]
async fn non_upgrade_requests_are_ignored() {
    let (gateway, _) = gateway_with_edge(AccessMode::Direct).await;
    let (mut parts, _body) = Request::builder()
        .uri("/ws")
        .header("host", "n1.cluster.example.com")
        .body(Body::empty())
        .unwrap()
        .into_parts();
    assert!(gateway.try_handle(&mut parts).await.is_none());
}

#[tokio::test]
async fn unknown_subdomain_is_404() {
    let (gateway, _) = gateway_with_edge(AccessMode::Direct).await;
    let mut parts = upgrade_parts("nope.cluster.example.com", "/ws");
    let response = gateway.try_handle(&mut parts).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unset_mode_is_400() {
    let (gateway, _) = gateway_with_edge(AccessMode::Unset).await;
    let mut parts = upgrade_parts("n1.cluster.example.com", "/ws");
    let response = gateway.try_handle(&mut parts).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn proxy_mode_without_entrypoint_is_502() {
    let (gateway, _) = gateway_with_edge(AccessMode::Proxy).await;
    let mut parts = upgrade_parts("n1.cluster.example.com", "/ws");
    let response = gateway.try_handle(&mut parts).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn x_original_host_overrides_host() {
    let (gateway, node_id) = gateway_with_edge(AccessMode::Direct).await;
    let (mut parts, _body) = Request::builder()
        .uri("/test")
        .header("host", "ingress-pod-7")
        .header("x-original-host", "n1.cluster.example.com")
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
        .into_parts();

    let response = gateway.try_handle(&mut parts).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("x-xpod-direct-node").unwrap(),
        node_id.as_str()
    );
}
