// src/core/storage/accessor.rs

//! The tiered regional storage accessor: a local LRU file cache over a primary
//! object-store bucket, with cross-region read fallback and active-sync write
//! fan-out during migrations.
//!
//! Write ordering is fixed: primary bucket first, then cache, then sync
//! targets. A cache hit is therefore never newer than the primary bucket.

use super::bucket::{BucketStore, ObjectBucket, ObjectMeta, ObjectSummary};
use super::tracker::CacheTracker;
use crate::config::StorageConfig;
use crate::core::XpodError;
use crate::core::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

/// Progress snapshot delivered after each copied object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrateProgress {
    pub copied: usize,
    pub total: usize,
    pub bytes_transferred: u64,
}

/// Per-object progress callback. Returning an error aborts the migration with
/// that error; the engine uses this for cooperative cancellation.
pub type ProgressFn =
    Box<dyn FnMut(MigrateProgress) -> BoxFuture<'static, Result<(), XpodError>> + Send>;

/// The migration capability the accessor publishes. The staged migration
/// engine feature-tests this at runtime and refuses to run without it.
#[async_trait]
pub trait RegionMigration: Send + Sync {
    fn supports_migration(&self) -> bool;

    async fn migrate_to_region(
        &self,
        prefix: &str,
        target_region: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<MigrateProgress, XpodError>;

    fn setup_realtime_sync(&self, prefix: &str, target_region: &str) -> Result<(), XpodError>;

    fn stop_realtime_sync(&self, prefix: &str, target_region: &str);
}

/// Resolved accessor configuration.
#[derive(Debug, Clone)]
pub struct AccessorConfig {
    pub primary_bucket: String,
    pub local_cache_dir: PathBuf,
    pub cache_max_bytes: u64,
    pub region: Option<String>,
    /// `(region tag, bucket name)` pairs; fallback reads walk these in order,
    /// skipping the primary.
    pub region_buckets: Vec<(String, String)>,
}

impl AccessorConfig {
    /// Region buckets come out of the config map in region-tag order, which
    /// keeps the fallback sequence stable across restarts.
    pub fn from_storage_config(storage: &StorageConfig) -> Self {
        let mut region_buckets: Vec<(String, String)> = storage
            .region_buckets
            .iter()
            .map(|(region, bucket)| (region.clone(), bucket.clone()))
            .collect();
        region_buckets.sort();
        Self {
            primary_bucket: storage.primary_bucket.clone(),
            local_cache_dir: PathBuf::from(&storage.local_cache_dir),
            cache_max_bytes: storage.cache_max_bytes,
            region: storage.region.clone(),
            region_buckets,
        }
    }
}

/// An active sync entry: every write/delete under `prefix` is replicated to
/// `bucket_name` until the migration tears it down.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncTarget {
    prefix: String,
    target_region: String,
    bucket_name: String,
}

/// The result of a successful read: either the cache file itself or the bytes
/// fetched from a bucket.
#[derive(Debug)]
pub enum DataObject {
    File { file: tokio::fs::File, meta: ObjectMeta },
    Buffer { bytes: Bytes, meta: ObjectMeta },
}

impl DataObject {
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            DataObject::File { meta, .. } => meta,
            DataObject::Buffer { meta, .. } => meta,
        }
    }

    pub fn into_async_read(self) -> Pin<Box<dyn AsyncRead + Send>> {
        match self {
            DataObject::File { file, .. } => Box::pin(file),
            DataObject::Buffer { bytes, .. } => Box::pin(std::io::Cursor::new(bytes)),
        }
    }

    pub async fn into_bytes(self) -> Result<Bytes, XpodError> {
        match self {
            DataObject::Buffer { bytes, .. } => Ok(bytes),
            DataObject::File { mut file, .. } => {
                let mut buf = Vec::new();
                tokio::io::AsyncReadExt::read_to_end(&mut file, &mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

pub struct TieredAccessor {
    config: AccessorConfig,
    store: Arc<dyn BucketStore>,
    primary: Arc<dyn ObjectBucket>,
    tracker: CacheTracker,
    sync_targets: RwLock<Vec<SyncTarget>>,
}

impl TieredAccessor {
    /// Creates the accessor, ensuring the cache directory exists and warming
    /// the tracker from whatever files a previous run left behind.
    pub async fn new(
        config: AccessorConfig,
        store: Arc<dyn BucketStore>,
    ) -> Result<Self, XpodError> {
        tokio::fs::create_dir_all(&config.local_cache_dir).await?;
        let tracker = CacheTracker::new(config.cache_max_bytes);
        tracker.initialize_from_disk(&config.local_cache_dir).await;
        metrics::CACHE_TRACKED_BYTES.set(tracker.current_bytes() as i64);
        let primary = store.bucket(&config.primary_bucket);
        Ok(Self {
            config,
            store,
            primary,
            tracker,
            sync_targets: RwLock::new(Vec::new()),
        })
    }

    /// The bucket key of a resource: the URL path without its leading slash.
    fn object_key(id: &str) -> String {
        let path = match Url::parse(id) {
            Ok(url) => url.path().to_string(),
            Err(_) => id
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };
        path.trim_start_matches('/').to_string()
    }

    /// Maps a resource URL to its local cache file. Filesystem-reserved
    /// characters become `_`; dot segments are dropped so a crafted URL cannot
    /// escape the cache root.
    fn cache_file_path(&self, id: &str) -> PathBuf {
        let key = Self::object_key(id);
        let sanitized: String = key
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
                other => other,
            })
            .collect();
        let mut path = self.config.local_cache_dir.clone();
        for segment in sanitized
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        {
            path.push(segment);
        }
        path
    }

    fn bucket_for_region(&self, region: &str) -> Option<String> {
        self.config
            .region_buckets
            .iter()
            .find(|(tag, _)| tag == region)
            .map(|(_, bucket)| bucket.clone())
    }

    fn fallback_buckets(&self) -> Vec<String> {
        self.config
            .region_buckets
            .iter()
            .filter(|(_, bucket)| *bucket != self.config.primary_bucket)
            .map(|(_, bucket)| bucket.clone())
            .collect()
    }

    pub fn cache_bytes(&self) -> u64 {
        self.tracker.current_bytes()
    }

    async fn write_cache_file(&self, path: &Path, bytes: &Bytes) -> Result<(), XpodError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Populates the cache after a bucket read or a successful write. Cache
    /// trouble never fails the caller's operation.
    async fn populate_cache(&self, cache_path: &Path, bytes: &Bytes) {
        match self.write_cache_file(cache_path, bytes).await {
            Ok(()) => {
                self.tracker.add(cache_path.to_path_buf(), bytes.len() as u64);
                self.tracker.evict_if_needed().await;
                metrics::CACHE_TRACKED_BYTES.set(self.tracker.current_bytes() as i64);
            }
            Err(e) => warn!("cache write for {} failed: {e}", cache_path.display()),
        }
    }

    fn spawn_lazy_repatriation(&self, key: String, bytes: Bytes, meta: ObjectMeta, from: String) {
        let primary = Arc::clone(&self.primary);
        tokio::spawn(async move {
            match primary.put(&key, bytes, &meta).await {
                Ok(()) => debug!("lazy-migrated {key} home from {from}"),
                Err(e) => warn!("lazy migration of {key} from {from} failed: {e}"),
            }
        });
    }

    /// Read path: cache, then primary bucket, then (when migration support is
    /// configured) each fallback region bucket in order. Bytes served from a
    /// fallback are copied back into the primary in the background.
    pub async fn get_data(&self, id: &str) -> Result<DataObject, XpodError> {
        let cache_path = self.cache_file_path(id);
        if self.tracker.contains(&cache_path) {
            match tokio::fs::File::open(&cache_path).await {
                Ok(file) => {
                    let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
                    self.tracker.touch(&cache_path);
                    metrics::CACHE_HITS_TOTAL.inc();
                    return Ok(DataObject::File {
                        file,
                        meta: ObjectMeta {
                            size,
                            content_type: None,
                            last_modified: None,
                        },
                    });
                }
                Err(e) => {
                    warn!("tracked cache file {} unreadable: {e}", cache_path.display());
                    self.tracker.remove(&cache_path);
                }
            }
        }
        metrics::CACHE_MISSES_TOTAL.inc();

        let key = Self::object_key(id);
        let mut primary_err = None;
        let mut served_from: Option<String> = None;
        let mut found = match self.primary.get(&key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("primary bucket read for {key} failed: {e}");
                primary_err = Some(e);
                None
            }
        };

        if found.is_none() && self.supports_migration() {
            for bucket_name in self.fallback_buckets() {
                match self.store.bucket(&bucket_name).get(&key).await {
                    Ok(Some(hit)) => {
                        metrics::FALLBACK_READS_TOTAL.inc();
                        served_from = Some(bucket_name);
                        found = Some(hit);
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("fallback bucket {bucket_name} read for {key} failed: {e}"),
                }
            }
        }

        let Some((bytes, meta)) = found else {
            return match primary_err {
                Some(err) => Err(err),
                None => Err(XpodError::NotFound(id.to_string())),
            };
        };

        self.populate_cache(&cache_path, &bytes).await;
        if let Some(source) = served_from {
            self.spawn_lazy_repatriation(key, bytes.clone(), meta.clone(), source);
        }
        Ok(DataObject::Buffer { bytes, meta })
    }

    /// Write path: primary bucket first (failure aborts with the cache
    /// untouched), then best-effort cache, then fan-out to the active sync
    /// targets covering this key.
    pub async fn write_document(
        &self,
        id: &str,
        bytes: Bytes,
        meta: ObjectMeta,
    ) -> Result<(), XpodError> {
        let key = Self::object_key(id);
        self.primary.put(&key, bytes.clone(), &meta).await?;

        let cache_path = self.cache_file_path(id);
        if self.tracker.contains(&cache_path) {
            self.tracker.remove(&cache_path);
        }
        self.populate_cache(&cache_path, &bytes).await;

        for target in self.covering_sync_targets(&key) {
            let bucket = self.store.bucket(&target.bucket_name);
            if let Err(e) = bucket.put(&key, bytes.clone(), &meta).await {
                warn!(
                    "sync write of {key} to {} failed (bulk copy will catch up): {e}",
                    target.bucket_name
                );
            }
        }
        Ok(())
    }

    /// Delete path, symmetric with the write path.
    pub async fn delete_resource(&self, id: &str) -> Result<(), XpodError> {
        let key = Self::object_key(id);
        self.primary.delete(&key).await?;

        let cache_path = self.cache_file_path(id);
        if self.tracker.contains(&cache_path) {
            if let Err(e) = tokio::fs::remove_file(&cache_path).await {
                warn!("cache delete for {} failed: {e}", cache_path.display());
            }
            self.tracker.remove(&cache_path);
            metrics::CACHE_TRACKED_BYTES.set(self.tracker.current_bytes() as i64);
        }

        for target in self.covering_sync_targets(&key) {
            let bucket = self.store.bucket(&target.bucket_name);
            if let Err(e) = bucket.delete(&key).await {
                warn!(
                    "sync delete of {key} from {} failed: {e}",
                    target.bucket_name
                );
            }
        }
        Ok(())
    }

    pub async fn get_metadata(&self, id: &str) -> Result<Option<ObjectMeta>, XpodError> {
        self.primary.head(&Self::object_key(id)).await
    }

    pub async fn get_children(&self, id: &str) -> Result<Vec<ObjectSummary>, XpodError> {
        let mut prefix = Self::object_key(id);
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.primary.list(&prefix).await
    }

    pub async fn write_container(&self, id: &str, meta: ObjectMeta) -> Result<(), XpodError> {
        let mut key = Self::object_key(id);
        if !key.ends_with('/') {
            key.push('/');
        }
        self.primary.put(&key, Bytes::new(), &meta).await
    }

    fn covering_sync_targets(&self, key: &str) -> Vec<SyncTarget> {
        self.sync_targets
            .read()
            .iter()
            .filter(|target| key.starts_with(&target.prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RegionMigration for TieredAccessor {
    fn supports_migration(&self) -> bool {
        self.config.region.is_some() && !self.config.region_buckets.is_empty()
    }

    async fn migrate_to_region(
        &self,
        prefix: &str,
        target_region: &str,
        mut on_progress: Option<ProgressFn>,
    ) -> Result<MigrateProgress, XpodError> {
        if !self.supports_migration() {
            return Err(XpodError::NotImplemented(
                "region migration is not configured on this node".to_string(),
            ));
        }
        let target_bucket = self.bucket_for_region(target_region).ok_or_else(|| {
            XpodError::BadRequest(format!("unknown target region '{target_region}'"))
        })?;
        if target_bucket == self.config.primary_bucket {
            return Ok(MigrateProgress::default());
        }

        let objects = self.primary.list(&Self::object_key(prefix)).await?;
        let total = objects.len();
        let target = self.store.bucket(&target_bucket);

        let mut progress = MigrateProgress {
            copied: 0,
            total,
            bytes_transferred: 0,
        };
        for object in objects {
            target
                .copy_from(&self.config.primary_bucket, &object.key)
                .await?;
            progress.copied += 1;
            progress.bytes_transferred += object.size;
            if let Some(callback) = on_progress.as_mut() {
                callback(progress).await?;
            }
        }
        debug!(
            "copied {} objects ({}) under '{prefix}' to {target_bucket}",
            progress.copied,
            super::tracker::format_bytes(progress.bytes_transferred)
        );
        Ok(progress)
    }

    fn setup_realtime_sync(&self, prefix: &str, target_region: &str) -> Result<(), XpodError> {
        if !self.supports_migration() {
            return Err(XpodError::NotImplemented(
                "region migration is not configured on this node".to_string(),
            ));
        }
        let bucket_name = self.bucket_for_region(target_region).ok_or_else(|| {
            XpodError::BadRequest(format!("unknown target region '{target_region}'"))
        })?;
        if bucket_name == self.config.primary_bucket {
            return Ok(());
        }
        let target = SyncTarget {
            prefix: Self::object_key(prefix),
            target_region: target_region.to_string(),
            bucket_name,
        };
        let mut targets = self.sync_targets.write();
        if !targets.contains(&target) {
            targets.push(target);
        }
        Ok(())
    }

    fn stop_realtime_sync(&self, prefix: &str, target_region: &str) {
        let key = Self::object_key(prefix);
        self.sync_targets
            .write()
            .retain(|t| !(t.prefix == key && t.target_region == target_region));
    }
}
