//! Error types for the duewatch pipeline.

/// Top-level error type for notification cycles and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Idempotency store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Task source error that escaped a cycle.
    #[error("task source error: {0}")]
    Source(String),

    /// Outbound transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Too-late report could not be written.
    #[error("report error: {0}")]
    Report(String),

    /// Cycle metrics could not be recorded.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Inbound gateway error.
    #[error("gateway error: {0}")]
    Gateway(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Coarse failure category used for counting and logging.
///
/// - `Transient`: the dependency may answer next time (timeouts, 5xx).
/// - `MalformedInput`: the data itself is wrong; retrying will not help.
/// - `Exhausted`: no way left to reach the dependency (open breaker, or no
///   transport that could carry the message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    MalformedInput,
    Exhausted,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::MalformedInput => "malformed_input",
            Self::Exhausted => "exhausted",
        })
    }
}
