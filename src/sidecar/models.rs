//! Wire types for the update sidecar's HTTP protocol (C9), mirroring
//! the reference sidecar's `models.py` dataclasses. JSON bodies use
//! snake_case; timestamps are RFC 3339 UTC (§4.9).

use serde::{Deserialize, Serialize};

use crate::update::{Diagnostics, ExecutorState, UpdateRecord, UpdateStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub tag: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    pub previous_sha: String,
}

/// The `UpdateResult` described in §3: status, previous/new sha, the
/// ordered steps completed, an optional error, and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub status: UpdateStatus,
    pub previous_sha: Option<String>,
    pub new_sha: Option<String>,
    pub steps_completed: Vec<String>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl From<&UpdateRecord> for UpdateResult {
    fn from(record: &UpdateRecord) -> Self {
        Self {
            status: record.status,
            previous_sha: record.previous_sha.clone(),
            new_sha: record.new_sha.clone(),
            steps_completed: record.steps_completed.clone(),
            error: record.error.clone(),
            duration_seconds: record.duration_seconds(),
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

impl From<UpdateRecord> for UpdateResult {
    fn from(record: UpdateRecord) -> Self {
        Self::from(&record)
    }
}

/// `GET /status`: current state, current operation, last result, uptime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarStatus {
    pub state: ExecutorState,
    pub current_operation: Option<String>,
    pub last_result: Option<UpdateResult>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub tag: String,
    pub version: Option<String>,
    pub result: UpdateResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&UpdateRecord> for HistoryEntry {
    fn from(record: &UpdateRecord) -> Self {
        Self {
            tag: record.target_ref.clone(),
            version: record.version.clone(),
            result: record.into(),
            timestamp: record.finished_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsResponse {
    #[serde(flatten)]
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
