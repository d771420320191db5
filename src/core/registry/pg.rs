// src/core/registry/pg.rs

//! Postgres-backed `NodeStore`.
//!
//! Every operation is a single statement; the database serializes concurrent
//! writers, which is the whole coordination model of the cluster.

use super::node::{
    NodeConnectivity, NodeModePatch, NodeRecord, NodeType, RegisterCenterNode, RegisteredNode,
};
use super::store::{NodeStore, merge_json};
use super::token;
use crate::core::XpodError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgNodeStore {
    pool: PgPool,
}

impl PgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T: std::str::FromStr>(raw: &str, column: &str) -> Result<T, XpodError> {
    raw.parse()
        .map_err(|_| XpodError::StoreError(format!("unexpected {column} value '{raw}'")))
}

fn node_from_row(row: &PgRow) -> Result<NodeRecord, XpodError> {
    let node_type: String = row.try_get("node_type")?;
    let access_mode: String = row.try_get("access_mode")?;
    let connectivity: String = row.try_get("connectivity_status")?;
    Ok(NodeRecord {
        node_id: row.try_get("node_id")?,
        node_type: parse_enum(&node_type, "node_type")?,
        display_name: row.try_get("display_name")?,
        token_hash: row.try_get("token_hash")?,
        access_mode: parse_enum(&access_mode, "access_mode")?,
        internal_ip: row.try_get("internal_ip")?,
        internal_port: row.try_get::<Option<i32>, _>("internal_port")?.map(|p| p as u16),
        public_ip: row.try_get("public_ip")?,
        public_port: row.try_get::<Option<i32>, _>("public_port")?.map(|p| p as u16),
        subdomain: row.try_get("subdomain")?,
        capabilities: row.try_get("capabilities")?,
        metadata: row.try_get("metadata")?,
        connectivity_status: parse_enum(&connectivity, "connectivity_status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_seen: row.try_get("last_seen")?,
    })
}

const SELECT_NODE: &str = "SELECT node_id, node_type, display_name, token_hash, access_mode, \
     internal_ip, internal_port, public_ip, public_port, subdomain, capabilities, metadata, \
     connectivity_status, created_at, updated_at, last_seen FROM nodes";

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn register_center_node(
        &self,
        req: RegisterCenterNode,
    ) -> Result<RegisteredNode, XpodError> {
        let now = Utc::now();
        let secret = token::mint_secret();
        let hash = token::token_hash(&secret);

        // `xmax = 0` distinguishes a fresh insert from a conflict-update; the
        // update arm never touches token_hash and refuses to repurpose a
        // non-center row.
        let row = sqlx::query(
            "INSERT INTO nodes (node_id, node_type, display_name, token_hash, internal_ip, \
             internal_port, connectivity_status, created_at, updated_at, last_seen) \
             VALUES ($1, 'center', $2, $3, $4, $5, 'reachable', $6, $6, $6) \
             ON CONFLICT (node_id) DO UPDATE SET \
               internal_ip = EXCLUDED.internal_ip, \
               internal_port = EXCLUDED.internal_port, \
               display_name = COALESCE(EXCLUDED.display_name, nodes.display_name), \
               connectivity_status = 'reachable', \
               updated_at = EXCLUDED.updated_at, \
               last_seen = EXCLUDED.last_seen \
             WHERE nodes.node_type = 'center' \
             RETURNING (xmax = 0) AS created, created_at",
        )
        .bind(&req.node_id)
        .bind(&req.display_name)
        .bind(&hash)
        .bind(&req.internal_ip)
        .bind(req.internal_port as i32)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(XpodError::AlreadyExists(format!(
                "node '{}' exists with a different type",
                req.node_id
            )));
        };
        let created: bool = row.try_get("created")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        Ok(RegisteredNode {
            node_id: req.node_id,
            registration_secret: created.then_some(secret),
            created_at,
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
        let hash = token::token_hash(&secret);

        sqlx::query(
            "INSERT INTO nodes (node_id, node_type, display_name, token_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(&node_id)
        .bind(node_type.to_string())
        .bind(&display_name)
        .bind(&hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

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
        sqlx::query(
            "UPDATE nodes SET internal_ip = $2, internal_port = $3, last_seen = $4, \
             updated_at = $4, connectivity_status = 'reachable' WHERE node_id = $1",
        )
        .bind(node_id)
        .bind(internal_ip)
        .bind(internal_port as i32)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_node_mode(
        &self,
        node_id: &str,
        patch: NodeModePatch,
    ) -> Result<(), XpodError> {
        let result = sqlx::query(
            "UPDATE nodes SET \
               access_mode = $2, \
               public_ip = COALESCE($3, public_ip), \
               public_port = COALESCE($4, public_port), \
               subdomain = COALESCE($5, subdomain), \
               connectivity_status = COALESCE($6, connectivity_status), \
               capabilities = COALESCE($7, capabilities), \
               updated_at = now() \
             WHERE node_id = $1",
        )
        .bind(node_id)
        .bind(patch.access_mode.to_string())
        .bind(&patch.public_ip)
        .bind(patch.public_port.map(|p| p as i32))
        .bind(&patch.subdomain)
        .bind(patch.connectivity_status.map(|s| s.to_string()))
        .bind(&patch.capabilities)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(XpodError::NotFound(format!("node '{node_id}'")));
        }
        Ok(())
    }

    async fn merge_node_metadata(
        &self,
        node_id: &str,
        patch: serde_json::Value,
    ) -> Result<(), XpodError> {
        // Read-merge-write. Metadata writes come from the owning node itself,
        // so last-writer-wins is acceptable here.
        let Some(mut metadata) = self.get_node_metadata(node_id).await? else {
            return Err(XpodError::NotFound(format!("node '{node_id}'")));
        };
        merge_json(&mut metadata, patch);
        sqlx::query("UPDATE nodes SET metadata = $2, updated_at = now() WHERE node_id = $1")
            .bind(node_id)
            .bind(&metadata)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, XpodError> {
        let row = sqlx::query(&format!("{SELECT_NODE} WHERE node_id = $1"))
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn get_node_secret(&self, node_id: &str) -> Result<Option<String>, XpodError> {
        let row = sqlx::query("SELECT token_hash FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get("token_hash").ok()).flatten())
    }

    async fn get_node_connectivity(
        &self,
        node_id: &str,
    ) -> Result<Option<NodeConnectivity>, XpodError> {
        Ok(self
            .get_node(node_id)
            .await?
            .as_ref()
            .map(NodeConnectivity::from))
    }

    async fn get_node_metadata(
        &self,
        node_id: &str,
    ) -> Result<Option<serde_json::Value>, XpodError> {
        let row = sqlx::query("SELECT metadata FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("metadata")).transpose()?)
    }

    async fn find_node_by_resource_path(&self, path: &str) -> Result<Option<String>, XpodError> {
        let row = sqlx::query(
            "SELECT node_id FROM node_pods \
             WHERE left($1, length(base_url_prefix)) = base_url_prefix \
             ORDER BY length(base_url_prefix) DESC LIMIT 1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.try_get("node_id")).transpose()?)
    }

    async fn find_node_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<NodeRecord>, XpodError> {
        let row = sqlx::query(&format!(
            "{SELECT_NODE} WHERE subdomain = $1 OR node_id = $1 LIMIT 1"
        ))
        .bind(subdomain)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn list_center_nodes(&self) -> Result<Vec<NodeRecord>, XpodError> {
        let rows = sqlx::query(&format!(
            "{SELECT_NODE} WHERE node_type = 'center' ORDER BY node_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, XpodError> {
        let rows = sqlx::query(&format!("{SELECT_NODE} ORDER BY node_id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn claim_prefix(&self, node_id: &str, base_url_prefix: &str) -> Result<(), XpodError> {
        sqlx::query(
            "INSERT INTO node_pods (node_id, base_url_prefix) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(node_id)
        .bind(base_url_prefix)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_prefix(&self, node_id: &str, base_url_prefix: &str) -> Result<(), XpodError> {
        sqlx::query("DELETE FROM node_pods WHERE node_id = $1 AND base_url_prefix = $2")
            .bind(node_id)
            .bind(base_url_prefix)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
