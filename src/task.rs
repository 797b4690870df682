//! Task model shared by the source, classifier, renderer and orchestrator.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Upstream task status.
///
/// Statuses are single-letter codes on the wire; unknown codes are kept
/// verbatim in [`TaskStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// `A`: open / authorised.
    Open,
    /// `S`: waiting.
    Waiting,
    /// `P`: requested by email or an external party.
    RequestedExternal,
    /// `Q`: requested from the client portal.
    RequestedPortal,
    /// `C`: concluded.
    Concluded,
    /// `D`: dismissed.
    Dismissed,
    /// `F`: finalized.
    Finalized,
    /// `E`: being rectified.
    Rectifying,
    /// `O`: rectified.
    Rectified,
    Other(String),
}

impl TaskStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "A" => Self::Open,
            "S" => Self::Waiting,
            "P" => Self::RequestedExternal,
            "Q" => Self::RequestedPortal,
            "C" => Self::Concluded,
            "D" => Self::Dismissed,
            "F" => Self::Finalized,
            "E" => Self::Rectifying,
            "O" => Self::Rectified,
            _ => Self::Other(code.trim().to_owned()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Open => "A",
            Self::Waiting => "S",
            Self::RequestedExternal => "P",
            Self::RequestedPortal => "Q",
            Self::Concluded => "C",
            Self::Dismissed => "D",
            Self::Finalized => "F",
            Self::Rectifying => "E",
            Self::Rectified => "O",
            Self::Other(code) => code,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Open => "Open",
            Self::Waiting => "Waiting",
            Self::RequestedExternal => "Requested (external)",
            Self::RequestedPortal => "Requested (client portal)",
            Self::Concluded => "Concluded",
            Self::Dismissed => "Dismissed",
            Self::Finalized => "Finalized",
            Self::Rectifying => "Rectifying",
            Self::Rectified => "Rectified",
            Self::Other(code) => code,
        }
    }

    /// Whether this status is in the configured open set.
    pub fn is_open_in(&self, open_codes: &[String]) -> bool {
        open_codes.iter().any(|c| c.trim().eq_ignore_ascii_case(self.code()))
    }
}

impl From<String> for TaskStatus {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        status.code().to_owned()
    }
}

/// One obligation, as collected for a single cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    /// `None` when the source had no due date or an unparseable one.
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    /// Responsible-party identifiers; may be empty until resolved.
    pub responsibles: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, due_date: Option<NaiveDate>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            due_date,
            status: TaskStatus::Open,
            responsibles: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_responsibles<I, S>(mut self, responsibles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responsibles = responsibles.into_iter().map(Into::into).collect();
        self
    }
}

/// Parse an upstream due date.
///
/// Accepts `YYYY-MM-DD`, an ISO-8601 timestamp (the date part is used as-is,
/// without timezone conversion) and `DD/MM/YYYY`. Anything else is `None`.
pub fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return Some(date);
    }
    if raw.len() > 10 && raw.as_bytes().get(10).is_some_and(|b| *b == b'T' || *b == b' ') {
        if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(ts.naive_local().date());
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(ts.date());
            }
        }
    }
    None
}
