// src/core/registry/memory.rs

//! In-memory `NodeStore`, used by standalone single-node deployments and the
//! test suite. Cross-node coordination obviously does not apply here; the
//! semantics otherwise mirror the Postgres store.

use super::node::{
    AccessMode, ConnectivityStatus, NodeConnectivity, NodeModePatch, NodeRecord, NodeType,
    RegisterCenterNode, RegisteredNode,
};
use super::store::{NodeStore, merge_json};
use super::token;
use crate::core::XpodError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: DashMap<String, NodeRecord>,
    /// Node-pods index: base URL prefix -> node id.
    prefixes: DashMap<String, String>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blank_record(node_id: String, node_type: NodeType, now: DateTime<Utc>) -> NodeRecord {
        NodeRecord {
            node_id,
            node_type,
            display_name: None,
            token_hash: None,
            access_mode: AccessMode::Unset,
            internal_ip: None,
            internal_port: None,
            public_ip: None,
            public_port: None,
            subdomain: None,
            capabilities: serde_json::json!({}),
            metadata: serde_json::json!({}),
            connectivity_status: ConnectivityStatus::Unknown,
            created_at: now,
            updated_at: now,
            last_seen: None,
        }
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn register_center_node(
        &self,
        req: RegisterCenterNode,
    ) -> Result<RegisteredNode, XpodError> {
        let now = Utc::now();
        if let Some(mut existing) = self.nodes.get_mut(&req.node_id) {
            if existing.node_type != NodeType::Center {
                return Err(XpodError::AlreadyExists(format!(
                    "node '{}' exists with a different type",
                    req.node_id
                )));
            }
            existing.internal_ip = Some(req.internal_ip);
            existing.internal_port = Some(req.internal_port);
            if req.display_name.is_some() {
                existing.display_name = req.display_name;
            }
            existing.connectivity_status = ConnectivityStatus::Reachable;
            existing.updated_at = now;
            existing.last_seen = Some(now);
            return Ok(RegisteredNode {
                node_id: existing.node_id.clone(),
                registration_secret: None,
                created_at: existing.created_at,
            });
        }

        let secret = token::mint_secret();
        let mut record = Self::blank_record(req.node_id.clone(), NodeType::Center, now);
        record.display_name = req.display_name;
        record.token_hash = Some(token::token_hash(&secret));
        record.internal_ip = Some(req.internal_ip);
        record.internal_port = Some(req.internal_port);
        record.connectivity_status = ConnectivityStatus::Reachable;
        record.last_seen = Some(now);
        self.nodes.insert(req.node_id.clone(), record);

        Ok(RegisteredNode {
            node_id: req.node_id,
            registration_secret: Some(secret),
            created_at: now,
        })
    }

    async fn create_node(
        &self,
        node_type: NodeType,
        display_name: Option<String>,
    ) -> Result<RegisteredNode, XpodError> {
        let now = Utc::now();
        let node_id = format!("{node_type}-{}", Uuid::new_v4());
        let secret = token::mint_secret();
        let mut record = Self::blank_record(node_id.clone(), node_type, now);
        record.display_name = display_name;
        record.token_hash = Some(token::token_hash(&secret));
        self.nodes.insert(node_id.clone(), record);
        Ok(RegisteredNode {
            node_id,
            registration_secret: Some(secret),
            created_at: now,
        })
    }

    async fn update_center_heartbeat(
        &self,
        node_id: &str,
        internal_ip: &str,
        internal_port: u16,
        at: DateTime<Utc>,
    ) -> Result<(), XpodError> {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.internal_ip = Some(internal_ip.to_string());
            node.internal_port = Some(internal_port);
            node.last_seen = Some(at);
            node.updated_at = at;
            node.connectivity_status = ConnectivityStatus::Reachable;
        }
        Ok(())
    }

    async fn update_node_mode(
        &self,
        node_id: &str,
        patch: NodeModePatch,
    ) -> Result<(), XpodError> {
        let Some(mut node) = self.nodes.get_mut(node_id) else {
            return Err(XpodError::NotFound(format!("node '{node_id}'")));
        };
        node.access_mode = patch.access_mode;
        if patch.public_ip.is_some() {
            node.public_ip = patch.public_ip;
        }
        if patch.public_port.is_some() {
            node.public_port = patch.public_port;
        }
        if patch.subdomain.is_some() {
            node.subdomain = patch.subdomain;
        }
        if let Some(status) = patch.connectivity_status {
            node.connectivity_status = status;
        }
        if let Some(capabilities) = patch.capabilities {
            node.capabilities = capabilities;
        }
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_node_metadata(
        &self,
        node_id: &str,
        patch: serde_json::Value,
    ) -> Result<(), XpodError> {
        let Some(mut node) = self.nodes.get_mut(node_id) else {
            return Err(XpodError::NotFound(format!("node '{node_id}'")));
        };
        merge_json(&mut node.metadata, patch);
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, XpodError> {
        Ok(self.nodes.get(node_id).map(|n| n.clone()))
    }

    async fn get_node_secret(&self, node_id: &str) -> Result<Option<String>, XpodError> {
        Ok(self.nodes.get(node_id).and_then(|n| n.token_hash.clone()))
    }

    async fn get_node_connectivity(
        &self,
        node_id: &str,
    ) -> Result<Option<NodeConnectivity>, XpodError> {
        Ok(self.nodes.get(node_id).map(|n| NodeConnectivity::from(&*n)))
    }

    async fn get_node_metadata(
        &self,
        node_id: &str,
    ) -> Result<Option<serde_json::Value>, XpodError> {
        Ok(self.nodes.get(node_id).map(|n| n.metadata.clone()))
    }

    async fn find_node_by_resource_path(&self, path: &str) -> Result<Option<String>, XpodError> {
        let mut best: Option<(usize, String)> = None;
        for entry in self.prefixes.iter() {
            let prefix = entry.key();
            if path.starts_with(prefix.as_str())
                && best.as_ref().is_none_or(|(len, _)| prefix.len() > *len)
            {
                best = Some((prefix.len(), entry.value().clone()));
            }
        }
        Ok(best.map(|(_, node_id)| node_id))
    }

    async fn find_node_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<NodeRecord>, XpodError> {
        if let Some(node) = self.nodes.get(subdomain) {
            return Ok(Some(node.clone()));
        }
        Ok(self
            .nodes
            .iter()
            .find(|n| n.subdomain.as_deref() == Some(subdomain))
            .map(|n| n.clone()))
    }

    async fn list_center_nodes(&self) -> Result<Vec<NodeRecord>, XpodError> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Center)
            .map(|n| n.clone())
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, XpodError> {
        Ok(self.nodes.iter().map(|n| n.clone()).collect())
    }

    async fn claim_prefix(&self, node_id: &str, base_url_prefix: &str) -> Result<(), XpodError> {
        self.prefixes
            .insert(base_url_prefix.to_string(), node_id.to_string());
        Ok(())
    }

    async fn release_prefix(&self, node_id: &str, base_url_prefix: &str) -> Result<(), XpodError> {
        self.prefixes
            .remove_if(base_url_prefix, |_, owner| owner == node_id);
        Ok(())
    }
}
