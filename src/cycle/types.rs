use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use duewatch_guard::{CacheStats, DependencySnapshot};
use serde::Serialize;

use crate::action::ActionRequest;
use crate::error::FailureClass;
use crate::metrics::CycleCounters;

/// Whether a cycle actually sends and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Render and log every message; send nothing, record nothing.
    DryRun,
    Live,
}

impl ExecutionMode {
    pub fn is_live(self) -> bool {
        self == Self::Live
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::DryRun => "dry_run",
            Self::Live => "live",
        })
    }
}

/// Parameters of one cycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRequest {
    pub horizon_days: u32,
    /// Free-form trigger label, e.g. `morning` or `manual`.
    pub reason: String,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Collecting,
    Classifying,
    Filtering,
    Grouping,
    Rendering,
    Dispatching,
    Recording,
    Reporting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    /// The task source could not be read; counters cover what ran.
    PartialFailure { class: FailureClass, reason: String },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::PartialFailure { class, reason } => write!(f, "partial_failure ({class}): {reason}"),
        }
    }
}

/// Which transport delivered a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Stateful,
    Stateless,
}

/// Summary of a finished (or partially finished) cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: String,
    pub reason: String,
    pub mode: ExecutionMode,
    pub cycle_date: NaiveDate,
    pub utc_offset: String,
    pub horizon_days: u32,
    pub overdue_cutoff_days: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Last stage entered.
    pub stage: CycleStage,
    pub outcome: CycleOutcome,
    pub counters: CycleCounters,
    pub dependencies: Vec<DependencySnapshot>,
}

/// `notify_<UTC stamp>_<6 hex>`.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("notify_{}_{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..6])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Applied,
    Ignored,
    Failed,
}

/// Response to an inbound event. Always produced, whatever happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionAck {
    pub status: AckStatus,
    pub action: Option<String>,
    pub task_id: Option<String>,
    pub detail: String,
}

impl ActionAck {
    pub fn new(request: &ActionRequest, status: AckStatus, detail: String) -> Self {
        Self {
            status,
            action: Some(request.action.as_str().to_owned()),
            task_id: Some(request.task_id.clone()),
            detail,
        }
    }

    /// Ack for a payload the normalizer could not read.
    pub fn unextractable() -> Self {
        Self {
            status: AckStatus::Ignored,
            action: None,
            task_id: None,
            detail: "no action found in payload".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub dependencies: Vec<DependencySnapshot>,
    pub caches: BTreeMap<String, CacheStats>,
}
