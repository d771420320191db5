// src/core/storage/mod.rs

//! The tiered regional storage accessor and its object-store seam.

pub mod accessor;
pub mod bucket;
pub mod sign;
pub mod tracker;

pub use accessor::{
    AccessorConfig, DataObject, MigrateProgress, ProgressFn, RegionMigration, TieredAccessor,
};
pub use bucket::{
    BucketStore, HttpBucketStore, MemoryBucketStore, ObjectBucket, ObjectMeta, ObjectSummary,
};
pub use tracker::{CacheTracker, format_bytes};
