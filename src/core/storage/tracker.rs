// src/core/storage/tracker.rs

//! In-memory bookkeeping for the local cache directory.
//!
//! Tracks `(size, last_access)` per cache file and enforces the byte budget
//! with a sorted LRU sweep down to the low-water mark. All map mutations run
//! inside short, non-suspending critical sections; file deletions happen
//! outside the lock, so eviction can never race the size accounting.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Eviction stops once usage falls to this fraction of the budget.
const EVICTION_LOW_WATER: f64 = 0.8;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    size: u64,
    last_access: SystemTime,
}

#[derive(Debug, Default)]
struct TrackerInner {
    entries: HashMap<PathBuf, CacheEntry>,
    current_bytes: u64,
}

#[derive(Debug)]
pub struct CacheTracker {
    max_bytes: u64,
    inner: Mutex<TrackerInner>,
}

impl CacheTracker {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// Rebuilds the tracker from the files already present under `root`.
    /// Per-file errors are logged and skipped.
    pub async fn initialize_from_disk(&self, root: &Path) {
        let mut pending = vec![root.to_path_buf()];
        let mut loaded = 0usize;
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    if dir != root {
                        warn!("cache scan: cannot read {}: {e}", dir.display());
                    }
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        let meta = match entry.metadata().await {
                            Ok(meta) => meta,
                            Err(e) => {
                                warn!("cache scan: cannot stat {}: {e}", path.display());
                                continue;
                            }
                        };
                        if meta.is_dir() {
                            pending.push(path);
                        } else {
                            let last_access = meta
                                .accessed()
                                .or_else(|_| meta.modified())
                                .unwrap_or_else(|_| SystemTime::now());
                            let mut inner = self.inner.lock();
                            inner.current_bytes += meta.len();
                            inner.entries.insert(
                                path,
                                CacheEntry {
                                    size: meta.len(),
                                    last_access,
                                },
                            );
                            loaded += 1;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("cache scan: error under {}: {e}", dir.display());
                        break;
                    }
                }
            }
        }
        let current = self.current_bytes();
        debug!(
            "cache tracker initialized: {loaded} files, {}",
            format_bytes(current)
        );
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().entries.contains_key(path)
    }

    /// Refreshes the access time of a tracked file.
    pub fn touch(&self, path: &Path) {
        if let Some(entry) = self.inner.lock().entries.get_mut(path) {
            entry.last_access = SystemTime::now();
        }
    }

    /// Registers a freshly written cache file. Callers follow up with
    /// [`CacheTracker::evict_if_needed`].
    pub fn add(&self, path: PathBuf, size: u64) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.insert(
            path,
            CacheEntry {
                size,
                last_access: SystemTime::now(),
            },
        ) {
            inner.current_bytes = inner.current_bytes.saturating_sub(previous.size);
        }
        inner.current_bytes += size;
    }

    /// Drops a file from the tracker (the caller deletes the file itself).
    pub fn remove(&self, path: &Path) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(path) {
            inner.current_bytes = inner.current_bytes.saturating_sub(entry.size);
        }
    }

    pub fn current_bytes(&self) -> u64 {
        self.inner.lock().current_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Enforces the byte budget. A no-op while usage is at or under the
    /// budget; otherwise evicts least-recently-accessed files until usage
    /// falls to the low-water mark, so back-to-back adds don't churn.
    pub async fn evict_if_needed(&self) {
        let low_water = (self.max_bytes as f64 * EVICTION_LOW_WATER) as u64;
        let victims: Vec<(PathBuf, u64)> = {
            let inner = self.inner.lock();
            if inner.current_bytes <= self.max_bytes {
                return;
            }
            let mut by_age: Vec<(&PathBuf, &CacheEntry)> = inner.entries.iter().collect();
            by_age.sort_by_key(|(_, entry)| entry.last_access);

            let mut projected = inner.current_bytes;
            let mut victims = Vec::new();
            for (path, entry) in by_age {
                if projected <= low_water {
                    break;
                }
                projected = projected.saturating_sub(entry.size);
                victims.push((path.clone(), entry.size));
            }
            victims
        };

        for (path, size) in victims {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("evicted {} ({})", path.display(), format_bytes(size));
                }
                Err(e) => {
                    warn!("failed to evict {}: {e}", path.display());
                }
            }
            // Accounting drops the entry even when the unlink failed; a
            // leftover file is re-discovered by the next cold-start scan.
            self.remove(&path);
        }
    }
}

/// Binary-unit formatting for log lines, two decimal places.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replaces_stale_entry() {
        let tracker = CacheTracker::new(1000);
        tracker.add(PathBuf::from("/tmp/a"), 400);
        tracker.add(PathBuf::from("/tmp/a"), 100);
        assert_eq!(tracker.current_bytes(), 100);
        assert_eq!(tracker.entry_count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let tracker = CacheTracker::new(1000);
        tracker.add(PathBuf::from("/tmp/a"), 400);
        tracker.remove(Path::new("/tmp/a"));
        tracker.remove(Path::new("/tmp/a"));
        assert_eq!(tracker.current_bytes(), 0);
    }

    #[test]
    fn format_bytes_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 262144), "5.25 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }
}
