// src/core/router/decision.rs

//! The routing decision: where a request for a given URL must go. For a fixed
//! directory snapshot this is a pure function of the request URL and the
//! current node's id.

use crate::core::XpodError;
use crate::core::directory::PodStore;
use crate::core::registry::{AccessMode, NodeStore, NodeType};

pub use crate::core::registry::NodeConnectivity;

#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Served by the local data-plane: system path, no pod, legacy pod with no
    /// owner, or a pod owned by this node.
    Local,
    /// Owned by another center node; reverse-proxy to it.
    RemotePeer(NodeConnectivity),
    /// Owned by an internet-reachable edge; redirect the client.
    EdgeDirect(NodeConnectivity),
    /// Owned by a NAT'd edge; HTTP is the L4 proxy's job, WebSocket upgrades
    /// tunnel in-process.
    EdgeProxy(NodeConnectivity),
    /// The directory points at a node the registry does not know (or an edge
    /// with no usable mode); decline so another handler may match.
    Unknown { node_id: String },
}

/// True when the path belongs to the gateway itself rather than a pod.
pub fn is_system_path(path: &str, system_prefixes: &[String]) -> bool {
    system_prefixes.iter().any(|prefix| path.starts_with(prefix))
}

pub async fn decide(
    url: &str,
    path: &str,
    my_node_id: &str,
    system_prefixes: &[String],
    pods: &dyn PodStore,
    nodes: &dyn NodeStore,
) -> Result<RouteDecision, XpodError> {
    if is_system_path(path, system_prefixes) {
        return Ok(RouteDecision::Local);
    }

    let Some(pod) = pods.find_by_resource_identifier(url).await? else {
        return Ok(RouteDecision::Local);
    };
    let Some(owner) = pod.node_id else {
        // Legacy pod: on whatever node is serving.
        return Ok(RouteDecision::Local);
    };
    if owner == my_node_id {
        return Ok(RouteDecision::Local);
    }

    let Some(connectivity) = nodes.get_node_connectivity(&owner).await? else {
        return Ok(RouteDecision::Unknown { node_id: owner });
    };

    Ok(match connectivity.node_type {
        NodeType::Center => RouteDecision::RemotePeer(connectivity),
        NodeType::Edge => match connectivity.access_mode {
            AccessMode::Direct => RouteDecision::EdgeDirect(connectivity),
            AccessMode::Proxy => RouteDecision::EdgeProxy(connectivity),
            AccessMode::Unset => RouteDecision::Unknown { node_id: owner },
        },
    })
}
