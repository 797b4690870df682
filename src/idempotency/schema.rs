//! SQLite DDL for the idempotency store.

use rusqlite::Connection;

/// Bumped whenever the DDL below changes shape.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode so a running gateway can read while a cycle writes.
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- One row per (day, responsible, task) notification that was delivered.
CREATE TABLE IF NOT EXISTS sent_notifications (
    day         TEXT NOT NULL,      -- YYYY-MM-DD in the configured offset
    responsible TEXT NOT NULL,
    task_id     TEXT NOT NULL,
    sent_at     INTEGER NOT NULL,   -- epoch seconds
    PRIMARY KEY (day, responsible, task_id)
);

CREATE INDEX IF NOT EXISTS idx_sent_day ON sent_notifications(day);

-- Tasks acknowledged through an inbound action.
CREATE TABLE IF NOT EXISTS acknowledgments (
    task_id         TEXT PRIMARY KEY,
    action          TEXT NOT NULL,  -- finalize | dismiss
    day             TEXT NOT NULL,
    acknowledged_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ack_day ON acknowledgments(day);
"#;

/// Apply the full schema and seed the version row on a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Returns `None` if the version row is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
