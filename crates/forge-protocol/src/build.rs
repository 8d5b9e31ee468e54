//! Build task and build log types.

use crate::ids::BuildId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a background build: `pending → queued → building → success|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Queued,
    Building,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTask {
    pub id: BuildId,
    pub status: BuildStatus,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl BuildTask {
    pub fn pending(id: BuildId) -> Self {
        Self {
            id,
            status: BuildStatus::Pending,
            logs: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One line of a build log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            details,
        }
    }
}

/// Snapshot of the build queue for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub is_processing: bool,
}
