//! Alert state — the single "has today's alert gone out" row.
//!
//! The row is overwritten, never deleted; a new calendar day simply
//! makes the stored date stale. `claim` is the atomic check-and-set
//! used when several requests (or processes) race on the same 429.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertState {
    pub date: NaiveDate,
    pub alerted: bool,
}

impl AlertState {
    pub fn alerted_on(&self, day: NaiveDate) -> bool {
        self.alerted && self.date == day
    }
}

pub trait AlertStateStore: Send + Sync {
    /// Current row, if any.
    fn load(&self) -> Result<Option<AlertState>>;

    /// Unconditionally overwrite the row.
    fn store(&self, state: AlertState) -> Result<()>;

    /// Mark `day` as alerted unless it already is.
    /// Returns `true` if this call made the change.
    fn claim(&self, day: NaiveDate) -> Result<bool>;
}

// ── SQLite ──────────────────────────────────────────────────────────

pub struct SqliteAlertStateStore {
    db: Mutex<Connection>,
}

impl SqliteAlertStateStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Connection::open(db_path)
            .context("Failed to open alert state database")?;
        Self::init(db)
    }

    fn init(db: Connection) -> Result<Self> {
        db.pragma_update(None, "journal_mode", "WAL")?;
        // Another process may hold the write lock briefly during a claim.
        db.busy_timeout(std::time::Duration::from_secs(5))?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS alert_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                date TEXT NOT NULL,
                alerted INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| anyhow!("alert state connection poisoned"))
    }
}

impl AlertStateStore for SqliteAlertStateStore {
    fn load(&self) -> Result<Option<AlertState>> {
        let db = self.conn()?;
        let row: Option<(String, bool)> = db
            .query_row(
                "SELECT date, alerted FROM alert_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(date, alerted)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("Corrupt alert_state date '{}'", date))?;
            Ok(AlertState { date, alerted })
        })
        .transpose()
    }

    fn store(&self, state: AlertState) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO alert_state (id, date, alerted, updated_at) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                alerted = excluded.alerted,
                updated_at = excluded.updated_at",
            params![state.date.to_string(), state.alerted, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn claim(&self, day: NaiveDate) -> Result<bool> {
        let db = self.conn()?;
        // Conditional upsert: the UPDATE branch only fires when the stored
        // row is for a different day or not yet alerted.
        let changed = db.execute(
            "INSERT INTO alert_state (id, date, alerted, updated_at) VALUES (1, ?1, 1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                alerted = 1,
                updated_at = excluded.updated_at
             WHERE alert_state.date <> excluded.date OR alert_state.alerted = 0",
            params![day.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Process-local store. Loses state on restart.
#[derive(Default)]
pub struct MemoryAlertStateStore {
    state: Mutex<Option<AlertState>>,
}

impl MemoryAlertStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<AlertState>>> {
        self.state.lock().map_err(|_| anyhow!("alert state poisoned"))
    }
}

impl AlertStateStore for MemoryAlertStateStore {
    fn load(&self) -> Result<Option<AlertState>> {
        Ok(*self.slot()?)
    }

    fn store(&self, state: AlertState) -> Result<()> {
        *self.slot()? = Some(state);
        Ok(())
    }

    fn claim(&self, day: NaiveDate) -> Result<bool> {
        let mut slot = self.slot()?;
        if slot.is_some_and(|s| s.alerted_on(day)) {
            return Ok(false);
        }
        *slot = Some(AlertState { date: day, alerted: true });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn exercise(store: &dyn AlertStateStore) {
        assert_eq!(store.load().unwrap(), None);

        assert!(store.claim(day(1)).unwrap(), "first claim of the day wins");
        assert!(!store.claim(day(1)).unwrap(), "second claim same day loses");
        assert_eq!(store.load().unwrap(), Some(AlertState { date: day(1), alerted: true }));

        assert!(store.claim(day(2)).unwrap(), "new day starts unalerted");
        assert_eq!(store.load().unwrap().unwrap().date, day(2));

        store.store(AlertState { date: day(2), alerted: false }).unwrap();
        assert!(store.claim(day(2)).unwrap(), "explicitly cleared row can be claimed");
    }

    #[test]
    fn test_sqlite_store_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAlertStateStore::open(&dir.path().join("alerts.db")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_memory_store_semantics() {
        exercise(&MemoryAlertStateStore::new());
    }

    #[test]
    fn test_sqlite_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");
        {
            let store = SqliteAlertStateStore::open(&path).unwrap();
            assert!(store.claim(day(5)).unwrap());
        }
        let store = SqliteAlertStateStore::open(&path).unwrap();
        assert!(!store.claim(day(5)).unwrap());
        assert!(store.load().unwrap().unwrap().alerted_on(day(5)));
    }

    #[test]
    fn test_two_connections_one_winner() {
        // Two handles on the same file stand in for two processes.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.db");
        let a = Arc::new(SqliteAlertStateStore::open(&path).unwrap());
        let b = Arc::new(SqliteAlertStateStore::open(&path).unwrap());

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|store| std::thread::spawn(move || store.claim(day(9)).unwrap()))
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
