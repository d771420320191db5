// src/core/migration/mod.rs

//! The pod migration engine.
//!
//! Two modes share one validation preface. The simplified mode is a bare
//! ownership flip and leans on the accessor's cross-region read fallback for
//! correctness. The staged mode runs sync → bulk copy → flip → stop-sync with
//! persisted progress, and is selected automatically whenever the accessor
//! reports real per-region buckets.

use crate::core::XpodError;
use crate::core::directory::{MigrationState, MigrationStatus, Pod, PodStore};
use crate::core::metrics;
use crate::core::registry::{NodeStore, NodeType};
use crate::core::storage::{MigrateProgress, ProgressFn, RegionMigration};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Progress checkpoints of the staged pipeline.
const PROGRESS_SYNCING: u8 = 5;
const PROGRESS_SYNC_READY: u8 = 10;
const PROGRESS_COPY_DONE: u8 = 90;
const PROGRESS_SWITCHING: u8 = 95;
const PROGRESS_DONE: u8 = 100;

/// The result of a committed migration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub pod_id: String,
    pub source_node: String,
    pub target_node: String,
    pub migrated_at: DateTime<Utc>,
}

pub struct MigrationEngine {
    my_node_id: String,
    pods: Arc<dyn PodStore>,
    nodes: Arc<dyn NodeStore>,
    storage: Option<Arc<dyn RegionMigration>>,
    /// Cancellation flags of in-flight migrations, keyed by pod id. Presence
    /// of a key is what enforces "one migration per pod".
    in_flight: DashMap<String, Arc<AtomicBool>>,
}

impl MigrationEngine {
    pub fn new(
        my_node_id: String,
        pods: Arc<dyn PodStore>,
        nodes: Arc<dyn NodeStore>,
        storage: Option<Arc<dyn RegionMigration>>,
    ) -> Self {
        Self {
            my_node_id,
            pods,
            nodes,
            storage,
            in_flight: DashMap::new(),
        }
    }

    /// Shared validation: pod exists, target is a known center node, and the
    /// pod is not already where it is asked to go.
    async fn validate(
        &self,
        pod_id: &str,
        target_node: &str,
    ) -> Result<(Pod, String), XpodError> {
        let pod = self
            .pods
            .find_by_id(pod_id)
            .await?
            .ok_or_else(|| XpodError::NotFound(format!("pod '{pod_id}'")))?;
        let node = self
            .nodes
            .get_node(target_node)
            .await?
            .ok_or_else(|| XpodError::NotFound(format!("node '{target_node}'")))?;
        if node.node_type != NodeType::Center {
            return Err(XpodError::BadRequest(format!(
                "target node '{target_node}' is not a center node"
            )));
        }
        let source = pod.node_id.clone().unwrap_or_else(|| self.my_node_id.clone());
        if source == target_node {
            return Err(XpodError::AlreadyOnTarget);
        }
        Ok((pod, source))
    }

    /// Migrates a pod to another center node. Picks the staged pipeline when
    /// the accessor supports per-region buckets, the simplified flip
    /// otherwise.
    pub async fn migrate_pod(
        &self,
        pod_id: &str,
        target_node: &str,
    ) -> Result<MigrationOutcome, XpodError> {
        let cancel = match self.in_flight.entry(pod_id.to_string()) {
            Entry::Occupied(_) => return Err(XpodError::AlreadyMigrating),
            Entry::Vacant(vacant) => {
                let flag = Arc::new(AtomicBool::new(false));
                vacant.insert(Arc::clone(&flag));
                flag
            }
        };

        let result = match self.storage.as_ref().filter(|s| s.supports_migration()) {
            Some(storage) => {
                self.migrate_staged(pod_id, target_node, Arc::clone(storage), cancel)
                    .await
            }
            None => self.migrate_simplified(pod_id, target_node).await,
        };

        self.in_flight.remove(pod_id);
        if result.is_ok() {
            metrics::MIGRATIONS_TOTAL.inc();
        }
        result
    }

    /// Requests cancellation of an in-flight staged migration. Cancellation is
    /// cooperative: the flag is consulted before each object copy and before
    /// the ownership flip; once the flip has begun it is too late.
    pub fn cancel(&self, pod_id: &str) -> Result<(), XpodError> {
        let Some(flag) = self.in_flight.get(pod_id) else {
            return Err(XpodError::NotFound(format!(
                "no migration in flight for pod '{pod_id}'"
            )));
        };
        flag.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub async fn status(&self, pod_id: &str) -> Result<MigrationState, XpodError> {
        self.pods.get_migration_status(pod_id).await
    }

    /// One step: flip ownership. Reads landing on the new owner before the
    /// bytes do are served by the accessor's fallback path and lazily
    /// repatriated.
    async fn migrate_simplified(
        &self,
        pod_id: &str,
        target_node: &str,
    ) -> Result<MigrationOutcome, XpodError> {
        let (_pod, source) = self.validate(pod_id, target_node).await?;
        self.pods.set_node_id(pod_id, target_node).await?;
        info!("pod '{pod_id}' migrated {source} -> {target_node}");
        Ok(MigrationOutcome {
            pod_id: pod_id.to_string(),
            source_node: source,
            target_node: target_node.to_string(),
            migrated_at: Utc::now(),
        })
    }

    async fn migrate_staged(
        &self,
        pod_id: &str,
        target_node: &str,
        storage: Arc<dyn RegionMigration>,
        cancel: Arc<AtomicBool>,
    ) -> Result<MigrationOutcome, XpodError> {
        let (pod, source) = self.validate(pod_id, target_node).await?;
        let target_region = self.target_region(target_node).await?;
        let prefix = pod.base_url.clone();

        let result = self
            .run_staged_phases(
                pod_id,
                target_node,
                &target_region,
                &prefix,
                storage.as_ref(),
                cancel,
            )
            .await;

        match result {
            Ok(()) => {
                info!("pod '{pod_id}' migrated {source} -> {target_node} (staged, region {target_region})");
                Ok(MigrationOutcome {
                    pod_id: pod_id.to_string(),
                    source_node: source,
                    target_node: target_node.to_string(),
                    migrated_at: Utc::now(),
                })
            }
            Err(e) => {
                storage.stop_realtime_sync(&prefix, &target_region);
                if let Err(cleanup) = self
                    .pods
                    .set_migration_status(pod_id, MigrationState::default())
                    .await
                {
                    warn!("could not clear migration state of pod '{pod_id}': {cleanup}");
                }
                Err(e)
            }
        }
    }

    async fn run_staged_phases(
        &self,
        pod_id: &str,
        target_node: &str,
        target_region: &str,
        prefix: &str,
        storage: &dyn RegionMigration,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), XpodError> {
        // Phase 1: open the write fan-out, then mark it established.
        self.record_progress(pod_id, target_node, PROGRESS_SYNCING)
            .await?;
        storage.setup_realtime_sync(prefix, target_region)?;
        self.record_progress(pod_id, target_node, PROGRESS_SYNC_READY)
            .await?;

        // Phase 2: bulk copy; progress maps into the 10..90 band and the
        // cancel flag is honored between objects.
        let on_progress = self.copy_progress_callback(pod_id, target_node, Arc::clone(&cancel));
        storage
            .migrate_to_region(prefix, target_region, Some(on_progress))
            .await?;
        self.record_progress(pod_id, target_node, PROGRESS_COPY_DONE)
            .await?;

        // Phase 3: the flip. Not cancellable once entered.
        if cancel.load(Ordering::Relaxed) {
            return Err(XpodError::Cancelled);
        }
        self.record_progress(pod_id, target_node, PROGRESS_SWITCHING)
            .await?;
        self.pods.set_node_id(pod_id, target_node).await?;

        // Phase 4: close the fan-out and mark the migration done.
        storage.stop_realtime_sync(prefix, target_region);
        self.pods
            .set_migration_status(
                pod_id,
                MigrationState {
                    status: Some(MigrationStatus::Done),
                    target_node: Some(target_node.to_string()),
                    progress: Some(PROGRESS_DONE),
                },
            )
            .await?;
        Ok(())
    }

    fn copy_progress_callback(
        &self,
        pod_id: &str,
        target_node: &str,
        cancel: Arc<AtomicBool>,
    ) -> ProgressFn {
        let pods = Arc::clone(&self.pods);
        let pod_id = pod_id.to_string();
        let target_node = target_node.to_string();
        Box::new(move |progress: MigrateProgress| {
            let pods = Arc::clone(&pods);
            let pod_id = pod_id.clone();
            let target_node = target_node.clone();
            let cancel = Arc::clone(&cancel);
            Box::pin(async move {
                if cancel.load(Ordering::Relaxed) {
                    return Err(XpodError::Cancelled);
                }
                let banded = if progress.total == 0 {
                    PROGRESS_COPY_DONE
                } else {
                    PROGRESS_SYNC_READY
                        + ((progress.copied * 80) / progress.total) as u8
                };
                if let Err(e) = pods
                    .set_migration_status(
                        &pod_id,
                        MigrationState {
                            status: Some(MigrationStatus::Syncing),
                            target_node: Some(target_node),
                            progress: Some(banded),
                        },
                    )
                    .await
                {
                    warn!("progress write for pod '{pod_id}' failed: {e}");
                }
                Ok(())
            })
        })
    }

    async fn record_progress(
        &self,
        pod_id: &str,
        target_node: &str,
        progress: u8,
    ) -> Result<(), XpodError> {
        self.pods
            .set_migration_status(
                pod_id,
                MigrationState {
                    status: Some(MigrationStatus::Syncing),
                    target_node: Some(target_node.to_string()),
                    progress: Some(progress),
                },
            )
            .await
    }

    /// The target node's region tag, read from its registry metadata.
    async fn target_region(&self, target_node: &str) -> Result<String, XpodError> {
        let metadata = self
            .nodes
            .get_node_metadata(target_node)
            .await?
            .unwrap_or_default();
        metadata
            .get("region")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                XpodError::BadRequest(format!(
                    "target node '{target_node}' has no region tag; staged migration needs one"
                ))
            })
    }
}
