use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use xpod::core::storage::{
    AccessorConfig, BucketStore, MemoryBucketStore, ObjectMeta, TieredAccessor,
};

const PRIMARY: &str = "pods-eu-1";

async fn accessor(
    store: &Arc<MemoryBucketStore>,
    cache_dir: &TempDir,
    cache_max_bytes: u64,
) -> TieredAccessor {
    let config = AccessorConfig {
        primary_bucket: PRIMARY.to_string(),
        local_cache_dir: cache_dir.path().to_path_buf(),
        cache_max_bytes,
        region: None,
        region_buckets: Vec::new(),
    };
    TieredAccessor::new(config, Arc::clone(store) as Arc<dyn BucketStore>)
        .await
        .unwrap()
}

async fn seed(store: &Arc<MemoryBucketStore>, key: &str, size: usize) {
    store
        .bucket(PRIMARY)
        .put(key, Bytes::from(vec![0x5a; size]), &ObjectMeta::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn miss_then_hit_then_evict() {
    let store = Arc::new(MemoryBucketStore::new());
    let cache_dir = TempDir::new().unwrap();
    seed(&store, "u1.bin", 400).await;
    seed(&store, "u2.bin", 500).await;
    seed(&store, "u3.bin", 300).await;
    let accessor = accessor(&store, &cache_dir, 1000).await;

    let first = accessor.get_data("https://h/u1.bin").await.unwrap();
    assert_eq!(first.into_bytes().await.unwrap().len(), 400);
    assert_eq!(accessor.cache_bytes(), 400);
    tokio::time::sleep(Duration::from_millis(5)).await;

    accessor.get_data("https://h/u2.bin").await.unwrap();
    assert_eq!(accessor.cache_bytes(), 900);
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Third read pushes usage to 1200 and triggers eviction down to the
    // low-water mark: the least-recently-touched file (u1) goes.
    accessor.get_data("https://h/u3.bin").await.unwrap();
    assert_eq!(accessor.cache_bytes(), 800);
    assert!(!cache_dir.path().join("u1.bin").exists());
    assert!(cache_dir.path().join("u2.bin").exists());
    assert!(cache_dir.path().join("u3.bin").exists());

    // The evicted URL is served from the primary again and re-cached.
    let again = accessor.get_data("https://h/u1.bin").await.unwrap();
    assert_eq!(again.into_bytes().await.unwrap().len(), 400);
    assert!(cache_dir.path().join("u1.bin").exists());
    assert!(accessor.cache_bytes() <= 1000);
}

#[tokio::test]
async fn hit_touches_recency() {
    let store = Arc::new(MemoryBucketStore::new());
    let cache_dir = TempDir::new().unwrap();
    seed(&store, "a.bin", 400).await;
    seed(&store, "b.bin", 400).await;
    seed(&store, "c.bin", 400).await;
    let accessor = accessor(&store, &cache_dir, 1000).await;

    accessor.get_data("https://h/a.bin").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    accessor.get_data("https://h/b.bin").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Touch `a` again so `b` is now the LRU entry.
    accessor.get_data("https://h/a.bin").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    accessor.get_data("https://h/c.bin").await.unwrap();
    assert!(cache_dir.path().join("a.bin").exists());
    assert!(!cache_dir.path().join("b.bin").exists());
    assert_eq!(accessor.cache_bytes(), 800);
}

#[tokio::test]
async fn missing_object_is_not_found() {
    let store = Arc::new(MemoryBucketStore::new());
    let cache_dir = TempDir::new().unwrap();
    let accessor = accessor(&store, &cache_dir, 1000).await;

    let err = accessor.get_data("https://h/nope.bin").await.unwrap_err();
    assert!(matches!(err, xpod::XpodError::NotFound(_)));
    assert_eq!(accessor.cache_bytes(), 0);
}

#[tokio::test]
async fn cold_start_scan_restores_accounting() {
    let store = Arc::new(MemoryBucketStore::new());
    let cache_dir = TempDir::new().unwrap();
    seed(&store, "alice/a.bin", 300).await;
    seed(&store, "alice/b.bin", 200).await;

    {
        let accessor = accessor(&store, &cache_dir, 1000).await;
        accessor.get_data("https://h/alice/a.bin").await.unwrap();
        accessor.get_data("https://h/alice/b.bin").await.unwrap();
        assert_eq!(accessor.cache_bytes(), 500);
    }

    // A fresh accessor over the same directory rediscovers both files.
    let reborn = accessor(&store, &cache_dir, 1000).await;
    assert_eq!(reborn.cache_bytes(), 500);
}

#[tokio::test]
async fn reserved_characters_are_sanitized_in_cache_paths() {
    let store = Arc::new(MemoryBucketStore::new());
    let cache_dir = TempDir::new().unwrap();
    store
        .bucket(PRIMARY)
        .put(
            "alice/notes:v2|draft.md",
            Bytes::from_static(b"draft"),
            &ObjectMeta::default(),
        )
        .await
        .unwrap();
    let accessor = accessor(&store, &cache_dir, 1000).await;

    accessor
        .get_data("https://h/alice/notes:v2|draft.md")
        .await
        .unwrap();
    assert!(cache_dir.path().join("alice/notes_v2_draft.md").exists());
}
