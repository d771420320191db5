// src/core/registration.rs

//! Node identity and the heartbeat tick.
//!
//! On startup the node loads its persisted id (or mints one), detects its
//! cluster-internal address, and upserts itself into the registry. The
//! registration secret is returned only at creation and is kept in memory.

use crate::config::Config;
use crate::core::XpodError;
use crate::core::registry::{NodeStore, RegisterCenterNode};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

const NODE_ID_FILE: &str = ".node-id";

pub struct NodeRegistration {
    nodes: std::sync::Arc<dyn NodeStore>,
    node_id: String,
    internal_ip: String,
    internal_port: u16,
    heartbeat_interval: Duration,
    secret: Mutex<Option<String>>,
}

impl NodeRegistration {
    /// Loads or mints the node id, registers this node, and remembers the
    /// freshly minted secret when there is one.
    pub async fn bootstrap(
        config: &Config,
        nodes: std::sync::Arc<dyn NodeStore>,
    ) -> Result<Self, XpodError> {
        let node_id = load_or_create_node_id(Path::new(&config.node.root_file_path)).await?;
        let internal_ip = detect_internal_ip();
        let internal_port = config.internal_port();

        let registered = nodes
            .register_center_node(RegisterCenterNode {
                node_id: node_id.clone(),
                display_name: config.node.display_name.clone(),
                internal_ip: internal_ip.clone(),
                internal_port,
            })
            .await?;
        if registered.registration_secret.is_some() {
            info!("node '{node_id}' registered; a new registration secret was minted");
        } else {
            info!("node '{node_id}' re-registered");
        }

        Ok(Self {
            nodes,
            node_id,
            internal_ip,
            internal_port,
            heartbeat_interval: config.cluster.heartbeat_interval,
            secret: Mutex::new(registered.registration_secret),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn internal_ip(&self) -> &str {
        &self.internal_ip
    }

    /// The secret minted at first registration, if this process created the
    /// node record. It cannot be recovered from the store later.
    pub fn registration_secret(&self) -> Option<String> {
        self.secret.lock().clone()
    }

    /// The periodic liveness tick. A failed beat is just a missed beat; the
    /// next tick tries again.
    pub async fn run_heartbeat(self: std::sync::Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "heartbeat for node '{}' every {:?}",
            self.node_id, self.heartbeat_interval
        );
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self
                        .nodes
                        .update_center_heartbeat(
                            &self.node_id,
                            &self.internal_ip,
                            self.internal_port,
                            Utc::now(),
                        )
                        .await
                    {
                        warn!("heartbeat for node '{}' missed: {e}", self.node_id);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("heartbeat for node '{}' stopped", self.node_id);
                    return;
                }
            }
        }
    }
}

/// The cluster-internal IPv4 of this node: the `POD_IP` environment variable
/// when set, the first non-loopback interface address otherwise, empty as the
/// last resort.
pub fn detect_internal_ip() -> String {
    if let Ok(ip) = std::env::var("POD_IP")
        && !ip.trim().is_empty()
    {
        return ip.trim().to_string();
    }
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(ip)) if !ip.is_loopback() => ip.to_string(),
        _ => String::new(),
    }
}

/// Reads `{root}/.node-id`, tolerating a trailing newline, or mints
/// `center-{uuid}` and persists it.
async fn load_or_create_node_id(root: &Path) -> Result<String, XpodError> {
    let path = root.join(NODE_ID_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(raw) => {
            let node_id = raw.trim().to_string();
            if !node_id.is_empty() {
                return Ok(node_id);
            }
            warn!("{} is empty; minting a fresh node id", path.display());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let node_id = format!("center-{}", Uuid::new_v4());
    tokio::fs::create_dir_all(root).await?;
    tokio::fs::write(&path, format!("{node_id}\n")).await?;
    info!("minted node id '{node_id}' at {}", path.display());
    Ok(node_id)
}
