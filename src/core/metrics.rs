// src/core/metrics.rs

//! Defines and registers Prometheus metrics for node monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, IntGauge, TextEncoder, register_counter, register_int_gauge,
};

lazy_static! {
    // --- Router ---
    /// The total number of requests reverse-proxied to peer center nodes.
    pub static ref PROXIED_REQUESTS_TOTAL: Counter =
        register_counter!("xpod_proxied_requests_total", "Total requests proxied to peer center nodes.").unwrap();
    /// The total number of 307 redirects issued for direct-mode edge nodes.
    pub static ref EDGE_REDIRECTS_TOTAL: Counter =
        register_counter!("xpod_edge_redirects_total", "Total redirects issued to direct-mode edge nodes.").unwrap();
    /// The total number of WebSocket upgrades tunneled to proxy-mode edges.
    pub static ref TUNNELED_UPGRADES_TOTAL: Counter =
        register_counter!("xpod_tunneled_upgrades_total", "Total WebSocket upgrades proxied through edge tunnels.").unwrap();

    // --- Tiered accessor ---
    /// The number of bytes currently accounted to the local cache.
    pub static ref CACHE_TRACKED_BYTES: IntGauge =
        register_int_gauge!("xpod_cache_tracked_bytes", "Bytes currently tracked in the local cache.").unwrap();
    /// The total number of reads served from the local cache.
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("xpod_cache_hits_total", "Total reads served from the local cache.").unwrap();
    /// The total number of reads that had to go to a bucket.
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("xpod_cache_misses_total", "Total reads that missed the local cache.").unwrap();
    /// The total number of reads served by a fallback region bucket.
    pub static ref FALLBACK_READS_TOTAL: Counter =
        register_counter!("xpod_fallback_reads_total", "Total reads served by a fallback region bucket.").unwrap();

    // --- Migration ---
    /// The total number of completed pod migrations.
    pub static ref MIGRATIONS_TOTAL: Counter =
        register_counter!("xpod_migrations_total", "Total completed pod migrations.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
