//! Update history storage: a bounded in-memory ring always present, plus
//! an optional durable `rusqlite` store for operators who want history
//! to survive a sidecar restart (§3: both are intentional — the ring is
//! a hard bound on memory, the durable store is append-only and unbounded).

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const MAX_HISTORY: usize = 50;

/// Outcome of a single update attempt (§3, §4.9: wire form is
/// lowercase `success | failed | rolled_back`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Success,
    Failed,
    RolledBack,
}

impl UpdateStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateStatus::Success)
    }

    fn as_db_str(&self) -> &'static str {
        match self {
            UpdateStatus::Success => "success",
            UpdateStatus::Failed => "failed",
            UpdateStatus::RolledBack => "rolled_back",
        }
    }

    fn from_db_str(s: &str) -> Self {
        match s {
            "success" => UpdateStatus::Success,
            "rolled_back" => UpdateStatus::RolledBack,
            _ => UpdateStatus::Failed,
        }
    }
}

/// One completed update or rollback attempt (§3's `UpdateResult`, as
/// persisted). `steps_completed` is an ordered prefix of the plan —
/// `git_fetch`, `git_checkout`, `docker_build`, then `restart_<service>`
/// / `health_<service>` pairs per configured service, in order, up to
/// (not including) whichever step first failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: uuid::Uuid,
    pub action: String,
    pub target_ref: String,
    #[serde(default)]
    pub version: Option<String>,
    pub previous_sha: Option<String>,
    #[serde(default)]
    pub new_sha: Option<String>,
    #[serde(default)]
    pub steps_completed: Vec<String>,
    pub status: UpdateStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl UpdateRecord {
    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// A fixed-capacity ring buffer of the most recent update attempts.
pub struct HistoryRing {
    entries: Mutex<Vec<UpdateRecord>>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, record: UpdateRecord) {
        let mut entries = self.entries.lock().expect("history ring lock poisoned");
        entries.push(record);
        if entries.len() > self.capacity {
            let overflow = entries.len() - self.capacity;
            entries.drain(0..overflow);
        }
    }

    pub fn all(&self) -> Vec<UpdateRecord> {
        self.entries.lock().expect("history ring lock poisoned").clone()
    }

    pub fn last(&self) -> Option<UpdateRecord> {
        self.entries.lock().expect("history ring lock poisoned").last().cloned()
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

/// Optional durable store. When configured, every record pushed to the
/// in-memory ring is also appended here, without the ring's bound.
pub struct DurableStore {
    conn: Mutex<Connection>,
}

impl DurableStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS update_history (
                id TEXT PRIMARY KEY,
                action TEXT NOT NULL,
                target_ref TEXT NOT NULL,
                version TEXT,
                previous_sha TEXT,
                new_sha TEXT,
                steps_completed TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn append(&self, record: &UpdateRecord) -> Result<()> {
        let conn = self.conn.lock().expect("durable store lock poisoned");
        let steps_json = serde_json::to_string(&record.steps_completed).unwrap_or_default();
        conn.execute(
            "INSERT OR REPLACE INTO update_history
                (id, action, target_ref, version, previous_sha, new_sha, steps_completed, status, error, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                record.id.to_string(),
                record.action,
                record.target_ref,
                record.version,
                record.previous_sha,
                record.new_sha,
                steps_json,
                record.status.as_db_str(),
                record.error,
                record.started_at.to_rfc3339(),
                record.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<UpdateRecord>> {
        let conn = self.conn.lock().expect("durable store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, action, target_ref, version, previous_sha, new_sha, steps_completed, status, error, started_at, finished_at
             FROM update_history ORDER BY finished_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let id: String = row.get(0)?;
            let steps_json: String = row.get(6)?;
            let status: String = row.get(7)?;
            let started_at: String = row.get(9)?;
            let finished_at: String = row.get(10)?;
            Ok(UpdateRecord {
                id: uuid::Uuid::parse_str(&id).unwrap_or_else(|_| uuid::Uuid::nil()),
                action: row.get(1)?,
                target_ref: row.get(2)?,
                version: row.get(3)?,
                previous_sha: row.get(4)?,
                new_sha: row.get(5)?,
                steps_completed: serde_json::from_str(&steps_json).unwrap_or_default(),
                status: UpdateStatus::from_db_str(&status),
                error: row.get(8)?,
                started_at: DateTime::parse_from_rfc3339(&started_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                finished_at: DateTime::parse_from_rfc3339(&finished_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(CoreError::Database)
    }
}
