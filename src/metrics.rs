//! Per-cycle counters and the metrics collaborator.
//!
//! [`JsonlMetrics`] appends one JSON object per cycle to a monthly file,
//! `notification_cycle_<YYYY-MM>.jsonl`. Every line carries
//! [`METRICS_SCHEMA_VERSION`] so readers can skip lines they do not know.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::TemporalBucket;
use crate::cycle::CycleReport;
use crate::error::{FailureClass, NotifyError, Result};

pub const METRICS_SCHEMA_VERSION: u32 = 1;

/// Aggregate counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounters {
    pub pages_fetched: usize,
    pub page_cache_hits: usize,
    pub collected: usize,
    /// Tasks whose status is outside the open set.
    pub closed_filtered: usize,
    pub buckets: BTreeMap<TemporalBucket, usize>,
    /// Notifiable tasks with no responsible party.
    pub unassigned: usize,
    pub acknowledged: usize,
    /// Pairs already notified today.
    pub deduplicated: usize,
    /// Pairs claimed by an overlapping cycle.
    pub in_flight_skipped: usize,
    /// Messages rendered but not sent (dry run).
    pub previewed: usize,
    pub dispatched_stateful: usize,
    pub dispatched_stateless: usize,
    /// Pairs that fell back from the stateful to the stateless transport.
    pub stateless_fallbacks: usize,
    pub failed: usize,
    pub failures_by_class: BTreeMap<FailureClass, usize>,
    /// Sends that succeeded but could not be recorded.
    pub record_failures: usize,
    pub responsibles_notified: usize,
    pub responsibles_truncated: usize,
    /// Global summaries delivered through the stateless transport.
    pub summaries_sent: usize,
}

impl CycleCounters {
    pub fn count_bucket(&mut self, bucket: TemporalBucket) {
        *self.buckets.entry(bucket).or_default() += 1;
    }

    pub fn bucket(&self, bucket: TemporalBucket) -> usize {
        self.buckets.get(&bucket).copied().unwrap_or(0)
    }

    pub fn count_failure(&mut self, class: FailureClass) {
        self.failed += 1;
        *self.failures_by_class.entry(class).or_default() += 1;
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched_stateful + self.dispatched_stateless
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_cycle(&self, report: &CycleReport) -> Result<()>;
}

#[derive(Serialize)]
struct MetricsLine<'a> {
    schema_version: u32,
    collected_at: DateTime<Utc>,
    #[serde(flatten)]
    report: &'a CycleReport,
}

/// Monthly JSON Lines files under one directory.
#[derive(Debug, Clone)]
pub struct JsonlMetrics {
    dir: PathBuf,
}

impl JsonlMetrics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that receives the line for a cycle run on `report.cycle_date`.
    pub fn file_for(&self, report: &CycleReport) -> PathBuf {
        self.dir.join(format!(
            "notification_cycle_{}.jsonl",
            report.cycle_date.format("%Y-%m")
        ))
    }

    fn append(&self, report: &CycleReport, now: DateTime<Utc>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let line = serde_json::to_string(&MetricsLine {
            schema_version: METRICS_SCHEMA_VERSION,
            collected_at: now,
            report,
        })
        .map_err(|e| NotifyError::Metrics(e.to_string()))?;

        let path = self.file_for(report);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{line}")?;
        Ok(path)
    }
}

#[async_trait]
impl MetricsSink for JsonlMetrics {
    async fn record_cycle(&self, report: &CycleReport) -> Result<()> {
        let path = self.append(report, Utc::now())?;
        tracing::debug!(run_id = %report.run_id, path = %path.display(), "cycle metrics written");
        Ok(())
    }
}
