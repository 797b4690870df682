//! Granular idempotency tracking for notifications.
//!
//! A notification is identified by `(task, responsible, day)`: the same task
//! is sent to the same person at most once per calendar day, whatever the
//! lookahead window of the run that found it and whichever other tasks were
//! sent alongside it. Rows are written only after a transport confirms
//! delivery, so a failed send is retried by the next cycle.
//!
//! Overlapping cycles in one process serialise on a key through
//! [`IdempotencyStore::claim`]; the SQLite primary key guards the table
//! itself across processes.
//!
//! The store also remembers tasks acknowledged through inbound actions so the
//! filtering stage can drop them.

mod schema;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use schema::{apply_schema, read_schema_version};

/// Identity of one delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub task_id: String,
    pub responsible: String,
    pub day: NaiveDate,
}

impl IdempotencyKey {
    pub fn new(task_id: &str, responsible: &str, day: NaiveDate) -> Self {
        Self {
            task_id: task_id.trim().to_owned(),
            responsible: responsible.trim().to_owned(),
            day,
        }
    }

    fn day_str(&self) -> String {
        self.day.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}|{}", self.day_str(), self.responsible, self.task_id)
    }
}

/// Row counts for status output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub sent: u64,
    pub acknowledged: u64,
    pub oldest_day: Option<String>,
}

/// Persistent record of sent notifications and acknowledged tasks.
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct IdempotencyStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    in_flight: Arc<Mutex<HashSet<IdempotencyKey>>>,
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Reservation of one key for the duration of a dispatch-then-record
/// sequence. Released on drop.
#[derive(Debug)]
pub struct InFlightClaim {
    key: IdempotencyKey,
    in_flight: Arc<Mutex<HashSet<IdempotencyKey>>>,
}

impl InFlightClaim {
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.key);
        }
    }
}

impl IdempotencyStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Open the store and drop entries older than the retention window.
    pub fn open_and_prune(
        path: &Path,
        retention_days: u32,
        today: NaiveDate,
    ) -> Result<Self, StoreError> {
        let store = Self::open(path)?;
        let removed = store.prune(retention_days, today)?;
        if removed > 0 {
            tracing::info!(removed, retention_days, "pruned expired idempotency entries");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Whether a notification for `key` has already been delivered.
    pub fn was_sent(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sent_notifications WHERE day = ?1 AND responsible = ?2 AND task_id = ?3",
                params![key.day_str(), key.responsible, key.task_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a delivered notification. Returns `false` if it was already
    /// recorded.
    pub fn mark_sent(&self, key: &IdempotencyKey, sent_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO sent_notifications (day, responsible, task_id, sent_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![key.day_str(), key.responsible, key.task_id, sent_at.timestamp()],
        )?;
        Ok(rows > 0)
    }

    /// Remove sent and acknowledgment rows whose day is older than
    /// `today - retention_days`. Returns the number of rows removed.
    pub fn prune(&self, retention_days: u32, today: NaiveDate) -> Result<usize, StoreError> {
        let cutoff = today
            .checked_sub_signed(Duration::days(i64::from(retention_days)))
            .unwrap_or(NaiveDate::MIN)
            .format("%Y-%m-%d")
            .to_string();
        let conn = self.lock()?;
        let sent = conn.execute("DELETE FROM sent_notifications WHERE day < ?1", params![cutoff])?;
        let acks = conn.execute("DELETE FROM acknowledgments WHERE day < ?1", params![cutoff])?;
        Ok(sent + acks)
    }

    /// Reserve `key` for this process. Returns `None` if another cycle holds it.
    pub fn claim(&self, key: &IdempotencyKey) -> Option<InFlightClaim> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            key: key.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Remember that `task_id` was acknowledged with `action` on `day`.
    pub fn acknowledge(
        &self,
        task_id: &str,
        action: &str,
        day: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO acknowledgments (task_id, action, day, acknowledged_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                task_id.trim(),
                action,
                day.format("%Y-%m-%d").to_string(),
                at.timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn is_acknowledged(&self, task_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM acknowledgments WHERE task_id = ?1",
                params![task_id.trim()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let sent: i64 = conn.query_row("SELECT COUNT(*) FROM sent_notifications", [], |r| r.get(0))?;
        let acknowledged: i64 =
            conn.query_row("SELECT COUNT(*) FROM acknowledgments", [], |r| r.get(0))?;
        let oldest_day: Option<String> =
            conn.query_row("SELECT MIN(day) FROM sent_notifications", [], |r| r.get(0))?;
        Ok(StoreStats {
            sent: u64::try_from(sent).unwrap_or(0),
            acknowledged: u64::try_from(acknowledged).unwrap_or(0),
            oldest_day,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

/// Errors from the idempotency store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<StoreError> for crate::error::NotifyError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}
