//! Usage log — durable, append-only record of every upstream attempt.
//!
//! The dispatcher writes one entry per HTTP attempt before it decides
//! what to do next. A failed write aborts the dispatch, so the log is
//! never silently missing an attempt.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// One row of the usage log.
#[derive(Debug, Clone, Serialize)]
pub struct UsageLogEntry {
    pub request_id: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub api_name: String,
    pub endpoint_hit: String,
    pub request_method: String,
    pub request_payload: String,
    pub response_payload: String,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    /// Counted attempt index.
    pub attempt: u32,
    /// `success` | `rate_limited` | `http_error` | `network_error` | `malformed_response`
    pub outcome: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only sink for usage entries.
pub trait UsageRecorder: Send + Sync {
    fn record(&self, entry: &UsageLogEntry) -> Result<()>;
}

/// Rolling 24h aggregates for one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointUsage24h {
    pub endpoint_hit: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub avg_latency_ms: f64,
}

// ── SQLite Recorder ─────────────────────────────────────────────────

pub struct SqliteUsageRecorder {
    db: Mutex<Connection>,
}

impl SqliteUsageRecorder {
    /// Open (or create) the usage log at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Connection::open(db_path)
            .context("Failed to open usage log database")?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        // WAL mode for concurrent reads
        db.pragma_update(None, "journal_mode", "WAL")?;

        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS usage_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                user_id TEXT,
                user_email TEXT,
                api_name TEXT NOT NULL,
                endpoint_hit TEXT NOT NULL,
                request_method TEXT NOT NULL,
                request_payload TEXT NOT NULL,
                response_payload TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                status_code INTEGER,
                attempt INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_log_time ON usage_log(created_at);
            CREATE INDEX IF NOT EXISTS idx_usage_log_request ON usage_log(request_id);
            ",
        )?;

        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| anyhow!("usage log connection poisoned"))
    }

    /// Most recent entries, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<UsageLogEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT request_id, user_id, user_email, api_name, endpoint_hit, request_method,
                    request_payload, response_payload, response_time_ms, status_code,
                    attempt, outcome, error_message, created_at
             FROM usage_log ORDER BY id DESC LIMIT ?1",
        )?;

        let entries = stmt.query_map(params![limit], |row| {
            Ok(UsageLogEntry {
                request_id: row.get(0)?,
                user_id: row.get(1)?,
                user_email: row.get(2)?,
                api_name: row.get(3)?,
                endpoint_hit: row.get(4)?,
                request_method: row.get(5)?,
                request_payload: row.get(6)?,
                response_payload: row.get(7)?,
                response_time_ms: row.get::<_, i64>(8)? as u64,
                status_code: row.get::<_, Option<i64>>(9)?.map(|c| c as u16),
                attempt: row.get::<_, i64>(10)? as u32,
                outcome: row.get(11)?,
                error_message: row.get(12)?,
                created_at: row.get::<_, String>(13)
                    .map(|s| DateTime::parse_from_rfc3339(&s).unwrap_or_default().with_timezone(&Utc))?,
            })
        })?.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Number of entries written for one dispatch.
    pub fn count_for_request(&self, request_id: &str) -> Result<u64> {
        let db = self.conn()?;
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM usage_log WHERE request_id = ?1",
            params![request_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Rolling 24hr aggregates per endpoint.
    pub fn summary_last_24h(&self) -> Result<Vec<EndpointUsage24h>> {
        let db = self.conn()?;
        let cutoff = (Utc::now() - chrono::Duration::hours(24)).to_rfc3339();

        let mut stmt = db.prepare(
            "SELECT endpoint_hit,
                    COUNT(*) as total_requests,
                    SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END) as successes,
                    SUM(CASE WHEN outcome != 'success' THEN 1 ELSE 0 END) as failures,
                    SUM(CASE WHEN outcome = 'rate_limited' THEN 1 ELSE 0 END) as rate_limited,
                    COALESCE(AVG(response_time_ms), 0.0) as avg_latency_ms
             FROM usage_log
             WHERE created_at >= ?1
             GROUP BY endpoint_hit
             ORDER BY endpoint_hit",
        )?;

        let rows = stmt.query_map(params![cutoff], |row| {
            Ok(EndpointUsage24h {
                endpoint_hit: row.get(0)?,
                total_requests: row.get::<_, i64>(1)? as u64,
                successes: row.get::<_, i64>(2)? as u64,
                failures: row.get::<_, i64>(3)? as u64,
                rate_limited: row.get::<_, i64>(4)? as u64,
                avg_latency_ms: row.get(5)?,
            })
        })?.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

impl UsageRecorder for SqliteUsageRecorder {
    fn record(&self, e: &UsageLogEntry) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO usage_log (request_id, user_id, user_email, api_name, endpoint_hit,
                request_method, request_payload, response_payload, response_time_ms,
                status_code, attempt, outcome, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                e.request_id, e.user_id, e.user_email, e.api_name, e.endpoint_hit,
                e.request_method, e.request_payload, e.response_payload,
                e.response_time_ms as i64, e.status_code.map(i64::from),
                e.attempt as i64, e.outcome, e.error_message, e.created_at.to_rfc3339(),
            ],
        ).context("Failed to append usage log entry")?;
        Ok(())
    }
}
