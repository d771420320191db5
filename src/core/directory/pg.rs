// src/core/directory/pg.rs

//! Postgres-backed `PodStore`. The ownership flip in `set_node_id` is a single
//! `UPDATE`, serialized by the database against every other write on the row.

use super::{MigrationState, Pod, PodStore};
use crate::core::XpodError;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

#[derive(Debug, Clone)]
pub struct PgPodStore {
    pool: PgPool,
}

impl PgPodStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn pod_from_row(row: &PgRow) -> Result<Pod, XpodError> {
    let migration_status: Option<String> = row.try_get("migration_status")?;
    let migration_status = migration_status
        .as_deref()
        .map(|s| {
            s.parse()
                .map_err(|_| XpodError::StoreError(format!("unexpected migration_status '{s}'")))
        })
        .transpose()?;
    Ok(Pod {
        pod_id: row.try_get("pod_id")?,
        account_id: row.try_get("account_id")?,
        base_url: row.try_get("base_url")?,
        node_id: row.try_get("node_id")?,
        migration_status,
        migration_target_node: row.try_get("migration_target_node")?,
        migration_progress: row
            .try_get::<Option<i32>, _>("migration_progress")?
            .map(|p| p.clamp(0, 100) as u8),
    })
}

const SELECT_POD: &str = "SELECT pod_id, account_id, base_url, node_id, migration_status, \
     migration_target_node, migration_progress FROM pods";

#[async_trait]
impl PodStore for PgPodStore {
    async fn find_by_resource_identifier(&self, url: &str) -> Result<Option<Pod>, XpodError> {
        let row = sqlx::query(&format!(
            "{SELECT_POD} WHERE left($1, length(base_url)) = base_url \
             ORDER BY length(base_url) DESC LIMIT 1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(pod_from_row).transpose()
    }

    async fn find_by_id(&self, pod_id: &str) -> Result<Option<Pod>, XpodError> {
        let row = sqlx::query(&format!("{SELECT_POD} WHERE pod_id = $1"))
            .bind(pod_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pod_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Pod>, XpodError> {
        let rows = sqlx::query(&format!("{SELECT_POD} ORDER BY pod_id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pod_from_row).collect()
    }

    async fn insert(&self, pod: Pod) -> Result<(), XpodError> {
        let result = sqlx::query(
            "INSERT INTO pods (pod_id, account_id, base_url, node_id) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (pod_id) DO NOTHING",
        )
        .bind(&pod.pod_id)
        .bind(&pod.account_id)
        .bind(&pod.base_url)
        .bind(&pod.node_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(XpodError::AlreadyExists(format!("pod '{}'", pod.pod_id)));
        }
        Ok(())
    }

    async fn set_node_id(&self, pod_id: &str, node_id: &str) -> Result<(), XpodError> {
        let result = sqlx::query("UPDATE pods SET node_id = $2 WHERE pod_id = $1")
            .bind(pod_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(XpodError::NotFound(format!("pod '{pod_id}'")));
        }
        Ok(())
    }

    async fn set_migration_status(
        &self,
        pod_id: &str,
        state: MigrationState,
    ) -> Result<(), XpodError> {
        let result = sqlx::query(
            "UPDATE pods SET migration_status = $2, migration_target_node = $3, \
             migration_progress = $4 WHERE pod_id = $1",
        )
        .bind(pod_id)
        .bind(state.status.map(|s| s.to_string()))
        .bind(&state.target_node)
        .bind(state.progress.map(|p| p as i32))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(XpodError::NotFound(format!("pod '{pod_id}'")));
        }
        Ok(())
    }

    async fn get_migration_status(&self, pod_id: &str) -> Result<MigrationState, XpodError> {
        let pod = self
            .find_by_id(pod_id)
            .await?
            .ok_or_else(|| XpodError::NotFound(format!("pod '{pod_id}'")))?;
        Ok(MigrationState {
            status: pod.migration_status,
            target_node: pod.migration_target_node,
            progress: pod.migration_progress,
        })
    }
}
