// src/config.rs

//! Manages node configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

/// Configuration for this node's identity and on-disk state.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeConfig {
    /// Directory owned by this node process. Holds `.node-id` and the cache root.
    #[serde(default = "default_root_file_path")]
    pub root_file_path: String,
    /// Human-readable name reported at registration.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Port peers use to reach this node on the cluster's private network.
    /// Defaults to the public listen port.
    #[serde(default)]
    pub internal_port: Option<u16>,
    /// Address of the sibling data-plane process that serves locally-owned pods.
    #[serde(default = "default_data_plane_addr")]
    pub data_plane_addr: String,
}

fn default_root_file_path() -> String {
    "xpod_data".to_string()
}
fn default_data_plane_addr() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            root_file_path: default_root_file_path(),
            display_name: None,
            internal_port: None,
            data_plane_addr: default_data_plane_addr(),
        }
    }
}

/// Cluster-wide routing configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClusterConfig {
    /// When false, every request is served by the local data-plane and no
    /// proxying or redirecting takes place.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The ingress domain of the cluster, e.g. `cluster.example.com`.
    /// Node subdomains hang off this domain.
    #[serde(default)]
    pub ingress_domain: String,
    /// Path prefixes that always bypass pod routing.
    #[serde(default = "default_system_prefixes")]
    pub system_prefixes: Vec<String>,
    /// Interval between heartbeats written to the node registry.
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
}

fn default_true() -> bool {
    true
}
fn default_system_prefixes() -> Vec<String> {
    ["/idp/", "/.well-known/", "/-/", "/api/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ingress_domain: String::new(),
            system_prefixes: default_system_prefixes(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

/// Where the shared registry and pod directory live.
///
/// When `url` is absent the node falls back to process-local in-memory stores,
/// which is only meaningful for a single-node standalone deployment.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Configuration for the tiered storage accessor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Bucket this node writes to.
    #[serde(default)]
    pub primary_bucket: String,
    /// Base endpoint of the S3-compatible object store, e.g. `http://minio:9000`.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Directory for the local LRU file cache.
    #[serde(default = "default_cache_dir")]
    pub local_cache_dir: String,
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,
    /// Region tag of this node. Required for cross-region fallback and migration.
    #[serde(default)]
    pub region: Option<String>,
    /// Map of region tag to bucket name, one bucket per region.
    #[serde(default)]
    pub region_buckets: HashMap<String, String>,
}

fn default_cache_dir() -> String {
    "xpod_data/cache".to_string()
}
fn default_cache_max_bytes() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary_bucket: String::new(),
            endpoint: String::new(),
            access_key: None,
            secret_key: None,
            local_cache_dir: default_cache_dir(),
            cache_max_bytes: default_cache_max_bytes(),
            region: None,
            region_buckets: HashMap::new(),
        }
    }
}

/// A sibling process the supervisor launches and keeps alive.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Merged over the parent's environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub autostart: bool,
}

/// Supervisor settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9464
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    node: NodeConfig,
    #[serde(default)]
    cluster: ClusterConfig,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    supervisor: SupervisorConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7070
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated, and resolved node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            node: NodeConfig::default(),
            cluster: ClusterConfig::default(),
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            supervisor: SupervisorConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            node: raw.node,
            cluster: raw.cluster,
            database: raw.database,
            storage: raw.storage,
            supervisor: raw.supervisor,
            metrics: raw.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// The port peers use to reach this node inside the cluster.
    pub fn internal_port(&self) -> u16 {
        self.node.internal_port.unwrap_or(self.port)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.node.root_file_path.trim().is_empty() {
            return Err(anyhow!("node.root_file_path cannot be empty"));
        }
        if self.cluster.heartbeat_interval < Duration::from_secs(1) {
            return Err(anyhow!("cluster.heartbeat_interval must be at least 1s"));
        }
        if self.storage.cache_max_bytes == 0 {
            return Err(anyhow!("storage.cache_max_bytes cannot be 0"));
        }
        if let Some(region) = &self.storage.region
            && !self.storage.region_buckets.is_empty()
            && !self.storage.region_buckets.contains_key(region)
        {
            return Err(anyhow!(
                "storage.region_buckets must contain an entry for this node's region '{region}'"
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for svc in &self.supervisor.services {
            if svc.name.trim().is_empty() {
                return Err(anyhow!("supervisor service name cannot be empty"));
            }
            if !seen.insert(svc.name.as_str()) {
                return Err(anyhow!("duplicate supervisor service '{}'", svc.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn region_bucket_must_cover_own_region() {
        let mut config = Config::default();
        config.storage.region = Some("eu-1".into());
        config
            .storage
            .region_buckets
            .insert("ap-1".into(), "pods-ap-1".into());
        assert!(config.validate().is_err());

        config
            .storage
            .region_buckets
            .insert("eu-1".into(), "pods-eu-1".into());
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_service_names_rejected() {
        let mut config = Config::default();
        for _ in 0..2 {
            config.supervisor.services.push(ServiceConfig {
                name: "data-plane".into(),
                command: "node".into(),
                args: vec![],
                cwd: None,
                env: HashMap::new(),
                autostart: true,
            });
        }
        assert!(config.validate().is_err());
    }
}
