// src/core/directory/mod.rs

//! The pod directory: resolves an inbound URL to a pod and records which node
//! owns it. `set_node_id` is the migration commit primitive; it is a single
//! atomic row write, which is what lets the router read ownership inside each
//! request without holding any lock across the migration boundary.

pub mod memory;
pub mod pg;

use crate::core::XpodError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub use memory::MemoryPodStore;
pub use pg::PgPodStore;

/// State of an in-flight staged migration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MigrationStatus {
    Syncing,
    Done,
}

/// One per-user data container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub pod_id: String,
    pub account_id: String,
    /// Canonical URL prefix, e.g. `https://host/alice/`.
    pub base_url: String,
    /// Owning node. Absent means "serving node is whatever node got the
    /// request"; such legacy pods are treated as local.
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_status: Option<MigrationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_target_node: Option<String>,
    /// 0..=100 while a staged migration runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_progress: Option<u8>,
}

/// Migration bookkeeping fields, read and written as one unit.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub status: Option<MigrationStatus>,
    pub target_node: Option<String>,
    pub progress: Option<u8>,
}

#[async_trait]
pub trait PodStore: Send + Sync {
    /// Returns the pod whose `base_url` is the longest prefix of `url`.
    async fn find_by_resource_identifier(&self, url: &str) -> Result<Option<Pod>, XpodError>;

    async fn find_by_id(&self, pod_id: &str) -> Result<Option<Pod>, XpodError>;

    async fn list_all(&self) -> Result<Vec<Pod>, XpodError>;

    /// Creates a pod record. Called by the data-plane's account provisioning
    /// flow; the control plane itself only reads and migrates pods.
    async fn insert(&self, pod: Pod) -> Result<(), XpodError>;

    /// The migration commit: an atomic single-row ownership flip.
    async fn set_node_id(&self, pod_id: &str, node_id: &str) -> Result<(), XpodError>;

    async fn set_migration_status(
        &self,
        pod_id: &str,
        state: MigrationState,
    ) -> Result<(), XpodError>;

    async fn get_migration_status(&self, pod_id: &str) -> Result<MigrationState, XpodError>;
}
