//! Temporal classification of tasks relative to "today".
//!
//! Calendar arithmetic only: `delta = due_date - today` in whole days, with
//! `today` computed once per cycle in the configured offset so every task in
//! a cycle is judged against the same day.
//!
//! ```text
//!   TooLate   |   Overdue    | DueToday |   DueSoon     | NotYet
//! ------------+--------------+----------+---------------+--------
//!        < -cutoff    -cutoff..-1    0       1..=horizon   > horizon
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::task::Task;

/// Where a task falls relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalBucket {
    Overdue,
    DueToday,
    DueSoon,
    /// Overdue beyond the cutoff; reported, not notified.
    TooLate,
    /// Beyond the horizon; ignored this cycle.
    NotYet,
    /// Missing or malformed due date.
    Unparseable,
}

impl TemporalBucket {
    /// Buckets that produce a notification.
    pub fn is_notifiable(self) -> bool {
        matches!(self, Self::Overdue | Self::DueToday | Self::DueSoon)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::DueToday => "due_today",
            Self::DueSoon => "due_soon",
            Self::TooLate => "too_late",
            Self::NotYet => "not_yet",
            Self::Unparseable => "unparseable",
        }
    }
}

impl std::fmt::Display for TemporalBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The calendar day at `now` in the given offset.
pub fn cycle_today(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Classify a due date against `today`.
pub fn classify(
    due_date: Option<NaiveDate>,
    today: NaiveDate,
    overdue_cutoff_days: u32,
    horizon_days: u32,
) -> TemporalBucket {
    let Some(due) = due_date else {
        return TemporalBucket::Unparseable;
    };
    let delta = due.signed_duration_since(today).num_days();
    let cutoff = i64::from(overdue_cutoff_days);
    let horizon = i64::from(horizon_days);

    if delta < -cutoff {
        TemporalBucket::TooLate
    } else if delta < 0 {
        TemporalBucket::Overdue
    } else if delta == 0 {
        TemporalBucket::DueToday
    } else if delta <= horizon {
        TemporalBucket::DueSoon
    } else {
        TemporalBucket::NotYet
    }
}

pub fn classify_task(
    task: &Task,
    today: NaiveDate,
    overdue_cutoff_days: u32,
    horizon_days: u32,
) -> TemporalBucket {
    classify(task.due_date, today, overdue_cutoff_days, horizon_days)
}
