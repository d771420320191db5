// src/core/supervisor/logs.rs

//! The bounded log ring fed by the supervised processes' stdio. Single writer
//! per stdio reader, snapshot reads from the HTTP surface.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strum_macros::{Display, EnumString};

/// Capacity of the ring; the oldest entry is evicted on overflow.
pub const MAX_LOG_BUFFER: usize = 1000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The filtered tail of the ring: most recent `limit` entries matching the
    /// given level and source.
    pub fn tail(
        &self,
        level: Option<LogLevel>,
        source: Option<&str>,
        limit: usize,
    ) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let mut matched: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|entry| level.is_none_or(|l| entry.level == l))
            .filter(|entry| source.is_none_or(|s| entry.source == s))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
