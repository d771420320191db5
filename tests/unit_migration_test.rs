use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;
use xpod::XpodError;
use xpod::core::directory::{MemoryPodStore, MigrationStatus, Pod, PodStore};
use xpod::core::migration::MigrationEngine;
use xpod::core::registry::{MemoryNodeStore, NodeStore, NodeType, RegisterCenterNode};
use xpod::core::storage::{
    AccessorConfig, BucketStore, MemoryBucketStore, MigrateProgress, ObjectMeta, ProgressFn,
    RegionMigration, TieredAccessor,
};

const EU: &str = "pods-eu-1";
const AP: &str = "pods-ap-1";

async fn stores_with_pod() -> (Arc<MemoryNodeStore>, Arc<MemoryPodStore>) {
    let nodes = Arc::new(MemoryNodeStore::new());
    for (node_id, ip) in [("A", "10.0.0.1"), ("B", "10.0.0.2")] {
        nodes
            .register_center_node(RegisterCenterNode {
                node_id: node_id.to_string(),
                display_name: None,
                internal_ip: ip.to_string(),
                internal_port: 7070,
            })
            .await
            .unwrap();
    }
    let pods = Arc::new(MemoryPodStore::new());
    pods.insert(Pod {
        pod_id: "p".to_string(),
        account_id: "alice".to_string(),
        base_url: "https://h/p/".to_string(),
        node_id: Some("A".to_string()),
        migration_status: None,
        migration_target_node: None,
        migration_progress: None,
    })
    .await
    .unwrap();
    (nodes, pods)
}

fn simplified_engine(
    nodes: &Arc<MemoryNodeStore>,
    pods: &Arc<MemoryPodStore>,
) -> MigrationEngine {
    MigrationEngine::new(
        "A".to_string(),
        Arc::clone(pods) as Arc<dyn PodStore>,
        Arc::clone(nodes) as Arc<dyn NodeStore>,
        None,
    )
}

#[tokio::test]
async fn simplified_migration_flips_ownership_once() {
    let (nodes, pods) = stores_with_pod().await;
    let engine = simplified_engine(&nodes, &pods);

    let outcome = engine.migrate_pod("p", "B").await.unwrap();
    assert_eq!(outcome.source_node, "A");
    assert_eq!(outcome.target_node, "B");
    assert_eq!(
        pods.find_by_id("p").await.unwrap().unwrap().node_id.as_deref(),
        Some("B")
    );

    // Idempotence: the second identical call refuses.
    let err = engine.migrate_pod("p", "B").await.unwrap_err();
    assert!(matches!(err, XpodError::AlreadyOnTarget));
}

#[tokio::test]
async fn validation_rejects_bad_targets() {
    let (nodes, pods) = stores_with_pod().await;
    let engine = simplified_engine(&nodes, &pods);

    let err = engine.migrate_pod("ghost", "B").await.unwrap_err();
    assert!(matches!(err, XpodError::NotFound(_)));

    let err = engine.migrate_pod("p", "nowhere").await.unwrap_err();
    assert!(matches!(err, XpodError::NotFound(_)));

    let edge = nodes.create_node(NodeType::Edge, None).await.unwrap();
    let err = engine.migrate_pod("p", &edge.node_id).await.unwrap_err();
    assert!(matches!(err, XpodError::BadRequest(_)));

    // A legacy pod without an owner defaults its source to this node.
    pods.insert(Pod {
        pod_id: "legacy".to_string(),
        account_id: "old".to_string(),
        base_url: "https://h/legacy/".to_string(),
        node_id: None,
        migration_status: None,
        migration_target_node: None,
        migration_progress: None,
    })
    .await
    .unwrap();
    let err = engine.migrate_pod("legacy", "A").await.unwrap_err();
    assert!(matches!(err, XpodError::AlreadyOnTarget));
}

#[tokio::test]
async fn cancel_without_migration_is_not_found() {
    let (nodes, pods) = stores_with_pod().await;
    let engine = simplified_engine(&nodes, &pods);
    assert!(matches!(engine.cancel("p"), Err(XpodError::NotFound(_))));
}

#[tokio::test]
async fn staged_migration_copies_then_flips() {
    let (nodes, pods) = stores_with_pod().await;
    nodes
        .merge_node_metadata("B", serde_json::json!({"region": "ap-1"}))
        .await
        .unwrap();

    let buckets = Arc::new(MemoryBucketStore::new());
    for key in ["p/profile.ttl", "p/inbox/a"] {
        buckets
            .bucket(EU)
            .put(key, Bytes::from_static(b"data"), &ObjectMeta::default())
            .await
            .unwrap();
    }
    let cache_dir = TempDir::new().unwrap();
    let accessor = Arc::new(
        TieredAccessor::new(
            AccessorConfig {
                primary_bucket: EU.to_string(),
                local_cache_dir: cache_dir.path().to_path_buf(),
                cache_max_bytes: 1024 * 1024,
                region: Some("eu-1".to_string()),
                region_buckets: vec![
                    ("ap-1".to_string(), AP.to_string()),
                    ("eu-1".to_string(), EU.to_string()),
                ],
            },
            Arc::clone(&buckets) as Arc<dyn BucketStore>,
        )
        .await
        .unwrap(),
    );

    let engine = MigrationEngine::new(
        "A".to_string(),
        Arc::clone(&pods) as Arc<dyn PodStore>,
        Arc::clone(&nodes) as Arc<dyn NodeStore>,
        Some(Arc::clone(&accessor) as Arc<dyn RegionMigration>),
    );

    let outcome = engine.migrate_pod("p", "B").await.unwrap();
    assert_eq!(outcome.source_node, "A");

    // Ownership flipped, bulk copy landed, and the migration is marked done.
    assert_eq!(
        pods.find_by_id("p").await.unwrap().unwrap().node_id.as_deref(),
        Some("B")
    );
    for key in ["p/profile.ttl", "p/inbox/a"] {
        assert!(buckets.bucket(AP).get(key).await.unwrap().is_some(), "{key}");
    }
    let status = pods.get_migration_status("p").await.unwrap();
    assert_eq!(status.status, Some(MigrationStatus::Done));
    assert_eq!(status.progress, Some(100));

    // The realtime sync entry was torn down: later writes stay in the primary.
    accessor
        .write_document("https://h/p/later", Bytes::from_static(b"x"), ObjectMeta::default())
        .await
        .unwrap();
    assert!(buckets.bucket(AP).get("p/later").await.unwrap().is_none());
}

#[tokio::test]
async fn staged_migration_needs_target_region() {
    let (nodes, pods) = stores_with_pod().await;

    let buckets = Arc::new(MemoryBucketStore::new());
    let cache_dir = TempDir::new().unwrap();
    let accessor = Arc::new(
        TieredAccessor::new(
            AccessorConfig {
                primary_bucket: EU.to_string(),
                local_cache_dir: cache_dir.path().to_path_buf(),
                cache_max_bytes: 1024,
                region: Some("eu-1".to_string()),
                region_buckets: vec![("eu-1".to_string(), EU.to_string())],
            },
            Arc::clone(&buckets) as Arc<dyn BucketStore>,
        )
        .await
        .unwrap(),
    );
    let engine = MigrationEngine::new(
        "A".to_string(),
        Arc::clone(&pods) as Arc<dyn PodStore>,
        Arc::clone(&nodes) as Arc<dyn NodeStore>,
        Some(accessor as Arc<dyn RegionMigration>),
    );

    // Target node B carries no region tag.
    let err = engine.migrate_pod("p", "B").await.unwrap_err();
    assert!(matches!(err, XpodError::BadRequest(_)));
    assert_eq!(
        pods.find_by_id("p").await.unwrap().unwrap().node_id.as_deref(),
        Some("A")
    );
}

// --- cooperative cancellation ------------------------------------------------

/// A storage stub whose bulk copy blocks until the test lets it proceed,
/// recording the engine's calls.
struct GatedStorage {
    events: Mutex<Vec<String>>,
    started: Notify,
    proceed: Notify,
}

impl GatedStorage {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            started: Notify::new(),
            proceed: Notify::new(),
        }
    }
}

#[async_trait]
impl RegionMigration for GatedStorage {
    fn supports_migration(&self) -> bool {
        true
    }

    async fn migrate_to_region(
        &self,
        _prefix: &str,
        _target_region: &str,
        mut on_progress: Option<ProgressFn>,
    ) -> Result<MigrateProgress, XpodError> {
        self.events.lock().push("copy:start".to_string());
        self.started.notify_one();
        self.proceed.notified().await;
        if let Some(callback) = on_progress.as_mut() {
            callback(MigrateProgress {
                copied: 1,
                total: 2,
                bytes_transferred: 10,
            })
            .await?;
        }
        Err(XpodError::Internal("copy should have been cancelled".to_string()))
    }

    fn setup_realtime_sync(&self, _prefix: &str, _target_region: &str) -> Result<(), XpodError> {
        self.events.lock().push("sync:start".to_string());
        Ok(())
    }

    fn stop_realtime_sync(&self, _prefix: &str, _target_region: &str) {
        self.events.lock().push("sync:stop".to_string());
    }
}

#[tokio::test]
async fn cancellation_mid_copy_rejects_and_cleans_up() {
    let (nodes, pods) = stores_with_pod().await;
    nodes
        .merge_node_metadata("B", serde_json::json!({"region": "ap-1"}))
        .await
        .unwrap();

    let storage = Arc::new(GatedStorage::new());
    let engine = Arc::new(MigrationEngine::new(
        "A".to_string(),
        Arc::clone(&pods) as Arc<dyn PodStore>,
        Arc::clone(&nodes) as Arc<dyn NodeStore>,
        Some(Arc::clone(&storage) as Arc<dyn RegionMigration>),
    ));

    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.migrate_pod("p", "B").await })
    };
    storage.started.notified().await;

    // A second attempt while one is in flight refuses.
    let err = engine.migrate_pod("p", "B").await.unwrap_err();
    assert!(matches!(err, XpodError::AlreadyMigrating));

    engine.cancel("p").unwrap();
    storage.proceed.notify_one();

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(err, XpodError::Cancelled));

    // Ownership untouched, sync torn down, migration state cleared, and the
    // in-flight slot released.
    assert_eq!(
        pods.find_by_id("p").await.unwrap().unwrap().node_id.as_deref(),
        Some("A")
    );
    let events = storage.events.lock().clone();
    assert_eq!(events, vec!["sync:start", "copy:start", "sync:stop"]);
    assert!(pods.get_migration_status("p").await.unwrap().status.is_none());
    assert!(matches!(engine.cancel("p"), Err(XpodError::NotFound(_))));
}
