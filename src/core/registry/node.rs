// src/core/registry/node.rs

//! Data model of the node registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Whether a node is a long-lived shared server or a user-operated edge.
/// Immutable after creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeType {
    Center,
    Edge,
}

/// How traffic reaches an edge node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    /// Internet-reachable; clients are redirected to the node's public endpoint.
    Direct,
    /// Behind NAT; traffic goes through a tunnel entrypoint.
    Proxy,
    #[default]
    Unset,
}

/// Last observed reachability of a node. Heartbeats only ever promote this to
/// `Reachable`; downgrading is an operator action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectivityStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// One row of the node registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub node_type: NodeType,
    pub display_name: Option<String>,
    /// Hex-encoded SHA-256 of the registration secret. The secret itself is
    /// never stored.
    #[serde(skip_serializing)]
    pub token_hash: Option<String>,
    pub access_mode: AccessMode,
    pub internal_ip: Option<String>,
    pub internal_port: Option<u16>,
    pub public_ip: Option<String>,
    pub public_port: Option<u16>,
    pub subdomain: Option<String>,
    /// Free-form key/value capability set reported by the node.
    pub capabilities: serde_json::Value,
    /// Structured metadata: tunnel descriptors, region tag.
    pub metadata: serde_json::Value,
    pub connectivity_status: ConnectivityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// The reachability projection the router works with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConnectivity {
    pub node_id: String,
    pub node_type: NodeType,
    pub access_mode: AccessMode,
    pub internal_ip: Option<String>,
    pub internal_port: Option<u16>,
    pub public_ip: Option<String>,
    pub public_port: Option<u16>,
    pub subdomain: Option<String>,
    pub connectivity_status: ConnectivityStatus,
}

impl From<&NodeRecord> for NodeConnectivity {
    fn from(n: &NodeRecord) -> Self {
        Self {
            node_id: n.node_id.clone(),
            node_type: n.node_type,
            access_mode: n.access_mode,
            internal_ip: n.internal_ip.clone(),
            internal_port: n.internal_port,
            public_ip: n.public_ip.clone(),
            public_port: n.public_port,
            subdomain: n.subdomain.clone(),
            connectivity_status: n.connectivity_status,
        }
    }
}

/// Request payload of a center node's startup registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCenterNode {
    pub node_id: String,
    pub display_name: Option<String>,
    pub internal_ip: String,
    pub internal_port: u16,
}

/// Result of registering or creating a node.
///
/// `registration_secret` is populated only when the row was created in this
/// call; it cannot be retrieved later.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredNode {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by edge registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeModePatch {
    pub access_mode: AccessMode,
    pub public_ip: Option<String>,
    pub public_port: Option<u16>,
    pub subdomain: Option<String>,
    pub connectivity_status: Option<ConnectivityStatus>,
    pub capabilities: Option<serde_json::Value>,
}
