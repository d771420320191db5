use std::io::Write;
use std::time::Duration;
use xpod::config::Config;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn minimal_file_gets_defaults() {
    let file = write_config("port = 8080\n");
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.port, 8080);
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.internal_port(), 8080);
    assert!(config.cluster.enabled);
    assert_eq!(config.cluster.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(
        config.cluster.system_prefixes,
        vec!["/idp/", "/.well-known/", "/-/", "/api/"]
    );
    assert!(config.database.url.is_none());
    assert!(config.storage.primary_bucket.is_empty());
}

#[test]
fn full_file_round_trips() {
    let file = write_config(
        r#"
host = "10.0.0.1"
port = 7070
log_level = "debug"

[node]
root_file_path = "/var/lib/xpod"
display_name = "eu-rack-1"
internal_port = 7071
data_plane_addr = "127.0.0.1:3100"

[cluster]
ingress_domain = "cluster.example.com"
heartbeat_interval = "10s"

[database]
url = "postgres://xpod@db/xpod"

[storage]
primary_bucket = "pods-eu-1"
endpoint = "http://minio:9000"
access_key = "minio"
secret_key = "minio123"
local_cache_dir = "/var/cache/xpod"
cache_max_bytes = 1000
region = "eu-1"

[storage.region_buckets]
eu-1 = "pods-eu-1"
ap-1 = "pods-ap-1"

[[supervisor.services]]
name = "data-plane"
command = "node"
args = ["server.js"]

[metrics]
enabled = true
port = 9470
"#,
    );
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.internal_port(), 7071);
    assert_eq!(config.cluster.heartbeat_interval, Duration::from_secs(10));
    assert_eq!(config.storage.region.as_deref(), Some("eu-1"));
    assert_eq!(config.storage.region_buckets.len(), 2);
    assert_eq!(config.supervisor.services.len(), 1);
    assert!(config.supervisor.services[0].autostart);
    assert!(config.metrics.enabled);
}

#[test]
fn region_buckets_must_cover_own_region() {
    let file = write_config(
        r#"
[storage]
primary_bucket = "pods-eu-1"
region = "eu-1"

[storage.region_buckets]
ap-1 = "pods-ap-1"
"#,
    );
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}

#[test]
fn zero_port_is_rejected() {
    let file = write_config("port = 0\n");
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}
