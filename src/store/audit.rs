//! SQLite-backed audit log of prediction publishes and rollbacks.
//!
//! Append-only and best-effort: the ingestion path never fails because the
//! audit write did.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::models::Prediction;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS prediction_audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id TEXT NOT NULL,
    epoch_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    action TEXT NOT NULL,
    payload_json TEXT,
    recorded_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_market
    ON prediction_audit(market_id, epoch_id, id);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub market_id: String,
    pub epoch_id: u64,
    pub version: u32,
    pub action: String,
    pub recorded_at: i64,
}

pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open audit database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize audit schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record_publish(&self, prediction: &Prediction) -> Result<()> {
        let payload = serde_json::to_string(prediction).unwrap_or_default();
        self.conn
            .lock()
            .execute(
                "INSERT INTO prediction_audit \
                 (market_id, epoch_id, version, action, payload_json, recorded_at) \
                 VALUES (?1, ?2, ?3, 'publish', ?4, ?5)",
                params![
                    prediction.market_id,
                    prediction.epoch_id as i64,
                    prediction.version as i64,
                    payload,
                    Utc::now().timestamp(),
                ],
            )
            .context("Failed to record publish")?;
        Ok(())
    }

    pub fn record_rollback(&self, market_id: &str, epoch_id: u64) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO prediction_audit \
                 (market_id, epoch_id, version, action, payload_json, recorded_at) \
                 VALUES (?1, ?2, 0, 'rollback', NULL, ?3)",
                params![market_id, epoch_id as i64, Utc::now().timestamp()],
            )
            .context("Failed to record rollback")?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM prediction_audit", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT market_id, epoch_id, version, action, recorded_at \
                 FROM prediction_audit ORDER BY id DESC LIMIT ?1",
            )
            .context("Failed to prepare audit query")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AuditEntry {
                    market_id: row.get(0)?,
                    epoch_id: row.get::<_, i64>(1)? as u64,
                    version: row.get::<_, i64>(2)? as u32,
                    action: row.get(3)?,
                    recorded_at: row.get(4)?,
                })
            })
            .context("Failed to query audit entries")?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}
