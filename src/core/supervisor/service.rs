// src/core/supervisor/service.rs

//! Per-service state tracked by the supervisor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Exited non-zero; a restart is pending if the budget allows.
    Crashed,
}

/// Runtime state of one supervised service.
///
/// `pid` is set exactly while the status is `starting` or `running`;
/// `restart_count` only ever grows until an operator resets it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub restart_count: u32,
}

/// The per-service view returned by the status API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReport {
    pub name: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<i64>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
}

impl ServiceReport {
    pub fn new(name: &str, state: &ServiceState) -> Self {
        Self {
            name: name.to_string(),
            status: state.status,
            pid: state.pid,
            uptime_seconds: state
                .start_time
                .map(|started| (Utc::now() - started).num_seconds().max(0)),
            restart_count: state.restart_count,
            last_exit_code: state.last_exit_code,
        }
    }
}
