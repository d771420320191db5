// src/core/registry/store.rs

//! The persistence seam of the node registry.
//!
//! Store errors surface as `XpodError::StoreError`; absent rows come back as
//! `Ok(None)` or empty collections. The registry performs no retries.

use super::node::{
    NodeConnectivity, NodeModePatch, NodeRecord, NodeType, RegisterCenterNode, RegisteredNode,
};
use crate::core::XpodError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Idempotent upsert for a center node coming online. An existing row is
    /// refreshed in place (its `token_hash` preserved); a new row gets a
    /// freshly minted registration secret, returned only from this call.
    async fn register_center_node(
        &self,
        req: RegisterCenterNode,
    ) -> Result<RegisteredNode, XpodError>;

    /// Explicit node creation through the admin API. Mints the node id and the
    /// registration secret.
    async fn create_node(
        &self,
        node_type: NodeType,
        display_name: Option<String>,
    ) -> Result<RegisteredNode, XpodError>;

    /// Records a heartbeat: `last_seen`, `updated_at`, and connectivity forced
    /// to `reachable`.
    async fn update_center_heartbeat(
        &self,
        node_id: &str,
        internal_ip: &str,
        internal_port: u16,
        at: DateTime<Utc>,
    ) -> Result<(), XpodError>;

    /// Applies an edge registration patch (access mode, public endpoint,
    /// subdomain, capabilities).
    async fn update_node_mode(&self, node_id: &str, patch: NodeModePatch)
    -> Result<(), XpodError>;

    /// Structural merge of `patch` into the node's metadata map. Nested
    /// objects merge recursively; everything else replaces.
    async fn merge_node_metadata(
        &self,
        node_id: &str,
        patch: serde_json::Value,
    ) -> Result<(), XpodError>;

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, XpodError>;

    /// The stored token hash, if any.
    async fn get_node_secret(&self, node_id: &str) -> Result<Option<String>, XpodError>;

    async fn get_node_connectivity(
        &self,
        node_id: &str,
    ) -> Result<Option<NodeConnectivity>, XpodError>;

    async fn get_node_metadata(&self, node_id: &str)
    -> Result<Option<serde_json::Value>, XpodError>;

    /// Longest-prefix match of `path` over the node-pods index.
    async fn find_node_by_resource_path(&self, path: &str) -> Result<Option<String>, XpodError>;

    async fn find_node_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<NodeRecord>, XpodError>;

    async fn list_center_nodes(&self) -> Result<Vec<NodeRecord>, XpodError>;

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, XpodError>;

    /// Adds a `(node, base URL prefix)` pair to the node-pods index.
    async fn claim_prefix(&self, node_id: &str, base_url_prefix: &str) -> Result<(), XpodError>;

    /// Removes a pair from the node-pods index.
    async fn release_prefix(&self, node_id: &str, base_url_prefix: &str) -> Result<(), XpodError>;
}

/// Recursive JSON object merge used by `merge_node_metadata` implementations.
pub(crate) fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    use serde_json::Value;
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
