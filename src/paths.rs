//! Filesystem locations used by duewatch.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux default |
//! |---------|---------------|
//! | Data (idempotency db, sessions, reports, metrics) | `~/.local/share/duewatch/` |
//! | Config | `~/.config/duewatch/` |
//!
//! # Environment Overrides
//!
//! - `DUEWATCH_DATA_DIR` overrides [`data_dir`]
//! - `DUEWATCH_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("DUEWATCH_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("duewatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/duewatch-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("DUEWATCH_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(config).join("duewatch");
    }
    dirs::config_dir()
        .map(|d| d.join("duewatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/duewatch-config"))
}

/// SQLite database holding sent notifications and acknowledgments.
#[must_use]
pub fn idempotency_db_file() -> PathBuf {
    data_dir().join("idempotency.db")
}

/// JSON registry of conversation references.
#[must_use]
pub fn sessions_file() -> PathBuf {
    data_dir().join("conversation_references.json")
}

#[must_use]
pub fn reports_dir() -> PathBuf {
    data_dir().join("reports")
}

#[must_use]
pub fn metrics_dir() -> PathBuf {
    data_dir().join("metrics")
}
