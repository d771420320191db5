//! Ownership flip and routing, end to end: after a migrate call on node A,
//! requests reaching A proxy to B and requests reaching B are local, with the
//! bytes still served out of A's region bucket through the fallback path.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use xpod::core::directory::{MemoryPodStore, Pod, PodStore};
use xpod::core::migration::MigrationEngine;
use xpod::core::registry::{MemoryNodeStore, NodeStore, RegisterCenterNode};
use xpod::core::router::{RouteDecision, decide};
use xpod::core::storage::{
    AccessorConfig, BucketStore, MemoryBucketStore, ObjectMeta, TieredAccessor,
};

fn prefixes() -> Vec<String> {
    ["/idp/", "/.well-known/", "/-/", "/api/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[tokio::test]
async fn instant_migration_reroutes_and_falls_back() {
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

    // Before the flip: A serves locally, B proxies to A.
    let on_a = decide("https://h/p/foo", "/p/foo", "A", &prefixes(), &*pods, &*nodes)
        .await
        .unwrap();
    assert!(matches!(on_a, RouteDecision::Local));
    let on_b = decide("https://h/p/foo", "/p/foo", "B", &prefixes(), &*pods, &*nodes)
        .await
        .unwrap();
    assert!(matches!(on_b, RouteDecision::RemotePeer(ref peer) if peer.node_id == "A"));

    // The flip, as node A would run it for `POST /.cluster/pods/p/migrate`.
    let engine = MigrationEngine::new(
        "A".to_string(),
        Arc::clone(&pods) as Arc<dyn PodStore>,
        Arc::clone(&nodes) as Arc<dyn NodeStore>,
        None,
    );
    let outcome = engine.migrate_pod("p", "B").await.unwrap();
    assert_eq!(outcome.source_node, "A");
    assert_eq!(outcome.target_node, "B");

    // Immediately after: A proxies to B, B serves locally.
    let on_a = decide("https://h/p/foo", "/p/foo", "A", &prefixes(), &*pods, &*nodes)
        .await
        .unwrap();
    assert!(matches!(on_a, RouteDecision::RemotePeer(ref peer) if peer.node_id == "B"));
    let on_b = decide("https://h/p/foo", "/p/foo", "B", &prefixes(), &*pods, &*nodes)
        .await
        .unwrap();
    assert!(matches!(on_b, RouteDecision::Local));

    // B's accessor finds the bytes in A's region bucket and brings them home.
    let buckets = Arc::new(MemoryBucketStore::new());
    buckets
        .bucket("pods-eu-1")
        .put("p/foo", Bytes::from_static(b"payload"), &ObjectMeta::default())
        .await
        .unwrap();
    let cache_dir = TempDir::new().unwrap();
    let accessor_on_b = TieredAccessor::new(
        AccessorConfig {
            primary_bucket: "pods-ap-1".to_string(),
            local_cache_dir: cache_dir.path().to_path_buf(),
            cache_max_bytes: 1024 * 1024,
            region: Some("ap-1".to_string()),
            region_buckets: vec![
                ("ap-1".to_string(), "pods-ap-1".to_string()),
                ("eu-1".to_string(), "pods-eu-1".to_string()),
            ],
        },
        Arc::clone(&buckets) as Arc<dyn BucketStore>,
    )
    .await
    .unwrap();

    let read = accessor_on_b.get_data("https://h/p/foo").await.unwrap();
    let mut reader = read.into_async_read();
    let mut streamed = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut streamed)
        .await
        .unwrap();
    assert_eq!(streamed, b"payload");

    let mut repatriated = false;
    for _ in 0..50 {
        if buckets
            .bucket("pods-ap-1")
            .get("p/foo")
            .await
            .unwrap()
            .is_some()
        {
            repatriated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(repatriated, "bytes were not lazily copied to B's bucket");
}
