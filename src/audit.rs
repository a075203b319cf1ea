//! Audit log (§6): an append-only record of confirmation decisions the
//! platform cannot otherwise reconstruct after the fact. Grounded on the
//! reference platform's `_audit` helper (`tenant.py`), which logs a
//! structured action row on every state-changing admin operation; this
//! is the same pattern applied to autonomy confirm/cancel decisions.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub target_user_id: String,
    pub performed_by: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only `rusqlite`-backed audit trail. One row per recorded
/// decision; never updated or deleted in place.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                target_user_id TEXT NOT NULL,
                performed_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn record(&self, action: &str, target_user_id: &str, performed_by: &str) -> Result<()> {
        let conn = self.conn.lock().expect("audit log lock poisoned");
        conn.execute(
            "INSERT INTO audit_log (action, target_user_id, performed_by, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![action, target_user_id, performed_by, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().expect("audit log lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, action, target_user_id, performed_by, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let created_at: String = row.get(4)?;
            Ok(AuditEntry {
                id: row.get(0)?,
                action: row.get(1)?,
                target_user_id: row.get(2)?,
                performed_by: row.get(3)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(CoreError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_read_back_in_descending_order() {
        let log = AuditLog::open(":memory:").unwrap();
        log.record("confirm", "u1", "u1").unwrap();
        log.record("cancel", "u1", "u1").unwrap();

        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "cancel");
        assert_eq!(entries[1].action, "confirm");
    }

    #[test]
    fn recent_respects_limit() {
        let log = AuditLog::open(":memory:").unwrap();
        for _ in 0..5 {
            log.record("confirm", "u1", "u1").unwrap();
        }
        assert_eq!(log.recent(2).unwrap().len(), 2);
    }
}
