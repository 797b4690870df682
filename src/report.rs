//! Too-late report collaborator.
//!
//! Tasks overdue beyond the follow-up window are not notified; they are
//! handed to a [`TooLateReporter`] once per cycle instead.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{NotifyError, Result};
use crate::task::Task;

#[async_trait]
pub trait TooLateReporter: Send + Sync {
    async fn record_too_late(&self, tasks: &[Task], today: NaiveDate) -> Result<()>;
}

const HEADER: &str = "task_id,title,due_date,days_overdue,status,responsibles";

/// Quote a field when it contains a delimiter, quote or line break.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_owned()
    }
}

/// Render the report body, most overdue first.
pub fn render_csv(tasks: &[Task], today: NaiveDate) -> String {
    let mut rows: Vec<&Task> = tasks.iter().collect();
    rows.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));

    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(HEADER);
    out.push('\n');
    for task in rows {
        let (due, days) = match task.due_date {
            Some(due) => (
                due.format("%Y-%m-%d").to_string(),
                today.signed_duration_since(due).num_days().to_string(),
            ),
            None => (String::new(), String::new()),
        };
        let _ = writeln!(
            out,
            "{},{},{},{},{},{}",
            csv_field(&task.id),
            csv_field(&task.title),
            due,
            days,
            csv_field(task.status.code()),
            csv_field(&task.responsibles.join(";")),
        );
    }
    out
}

/// Writes `too_late_<day>.csv` and refreshes `too_late_latest.csv`.
#[derive(Debug, Clone)]
pub struct CsvTooLateReport {
    dir: PathBuf,
}

impl CsvTooLateReport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dated_path(&self, today: NaiveDate) -> PathBuf {
        self.dir.join(format!("too_late_{}.csv", today.format("%Y-%m-%d")))
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join("too_late_latest.csv")
    }
}

#[async_trait]
impl TooLateReporter for CsvTooLateReport {
    async fn record_too_late(&self, tasks: &[Task], today: NaiveDate) -> Result<()> {
        let body = render_csv(tasks, today);
        let dated = self.dated_path(today);
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&dated, &body)
            .map_err(|e| NotifyError::Report(format!("{}: {e}", dated.display())))?;
        std::fs::write(self.latest_path(), &body)
            .map_err(|e| NotifyError::Report(format!("latest copy: {e}")))?;
        tracing::info!(count = tasks.len(), path = %dated.display(), "too-late report written");
        Ok(())
    }
}
