//! Shared test utilities: in-memory collaborators and an orchestrator harness.
//!
//! Used by the `cycle` and `channels::gateway` test modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use duewatch_guard::{DependencyPolicy, GuardConfig, ResilienceManager, TtlCache};

use crate::channels::traits::{StatefulTransport, StatelessTransport, TransportError};
use crate::classify::TemporalBucket;
use crate::config::CycleConfig;
use crate::cycle::{Collaborators, CycleOrchestrator, CycleReport};
use crate::error::Result;
use crate::idempotency::IdempotencyStore;
use crate::metrics::MetricsSink;
use crate::render::{RenderedContent, Renderer};
use crate::report::TooLateReporter;
use crate::source::{FetchWindow, SourceError, TaskPage, TaskSource};
use crate::task::{Task, TaskStatus};

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// 12:00 UTC on the given day; the same calendar day at -03:00.
pub fn noon_utc(day: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).expect("valid time"))
}

/// Task source serving a fixed task list, split into pages.
#[derive(Default)]
pub struct FakeSource {
    pub tasks: Mutex<Vec<Task>>,
    pub page_size: usize,
    pub fail: AtomicBool,
    pub fetches: AtomicUsize,
    pub status_updates: Mutex<Vec<(String, TaskStatus)>>,
}

impl FakeSource {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            page_size: 100,
            ..Self::default()
        }
    }

    pub fn paged(tasks: Vec<Task>, page_size: usize) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            page_size,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskSource for FakeSource {
    async fn fetch_page(
        &self,
        _window: &FetchWindow,
        page_token: Option<&str>,
    ) -> std::result::Result<TaskPage, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transient("connection refused".into()));
        }
        let page: usize = page_token.map_or(0, |t| t.parse().unwrap_or(0));
        let tasks = self.tasks.lock().expect("tasks lock");
        let start = page * self.page_size;
        let end = (start + self.page_size).min(tasks.len());
        let slice = tasks.get(start..end).map(<[Task]>::to_vec).unwrap_or_default();
        Ok(TaskPage {
            tasks: slice,
            next_page: (end < tasks.len()).then(|| (page + 1).to_string()),
        })
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> std::result::Result<(), SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transient("connection refused".into()));
        }
        self.status_updates
            .lock()
            .expect("updates lock")
            .push((task_id.to_owned(), status));
        Ok(())
    }
}

/// Stateful transport with a fixed session set.
#[derive(Default)]
pub struct FakeStateful {
    pub sessions: HashSet<String>,
    pub failing: HashSet<String>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeStateful {
    pub fn with_sessions<I: IntoIterator<Item = &'static str>>(sessions: I) -> Self {
        Self {
            sessions: sessions.into_iter().map(str::to_owned).collect(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl StatefulTransport for FakeStateful {
    fn has_session(&self, responsible: &str) -> bool {
        self.sessions.contains(responsible)
    }

    async fn send(
        &self,
        responsible: &str,
        content: &RenderedContent,
    ) -> std::result::Result<(), TransportError> {
        if !self.sessions.contains(responsible) {
            return Err(TransportError::NoSession(responsible.to_owned()));
        }
        if self.failing.contains(responsible) {
            return Err(TransportError::Http("timed out".into()));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((responsible.to_owned(), content.text.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStateless {
    pub fail: AtomicBool,
    pub sent: Mutex<Vec<String>>,
}

impl FakeStateless {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl StatelessTransport for FakeStateless {
    async fn send(&self, content: &RenderedContent) -> std::result::Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 503,
                body: "unavailable".into(),
            });
        }
        self.sent.lock().expect("sent lock").push(content.text.clone());
        Ok(())
    }
}

/// Renders `responsible|task_id|bucket` so assertions can match exactly.
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(&self, task: &Task, responsible: &str, bucket: TemporalBucket) -> RenderedContent {
        RenderedContent::text(format!("{responsible}|{}|{bucket}", task.id))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(Vec<String>, NaiveDate)>>,
}

#[async_trait]
impl TooLateReporter for RecordingReporter {
    async fn record_too_late(&self, tasks: &[Task], today: NaiveDate) -> Result<()> {
        let ids = tasks.iter().map(|t| t.id.clone()).collect();
        self.reports.lock().expect("reports lock").push((ids, today));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    pub reports: Mutex<Vec<CycleReport>>,
}

impl RecordingMetrics {
    pub fn last(&self) -> Option<CycleReport> {
        self.reports.lock().expect("metrics lock").last().cloned()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn record_cycle(&self, report: &CycleReport) -> Result<()> {
        self.reports.lock().expect("metrics lock").push(report.clone());
        Ok(())
    }
}

/// Orchestrator wired to in-memory collaborators and a temp-dir store.
pub struct Harness {
    pub orchestrator: Arc<CycleOrchestrator>,
    pub source: Arc<FakeSource>,
    pub stateful: Arc<FakeStateful>,
    pub stateless: Arc<FakeStateless>,
    pub reporter: Arc<RecordingReporter>,
    pub metrics: Arc<RecordingMetrics>,
    _dir: tempfile::TempDir,
}

/// Generous limits so tests never trip the guards unless they mean to.
pub fn relaxed_guard_config() -> GuardConfig {
    GuardConfig {
        default: DependencyPolicy {
            failure_threshold: 3,
            recovery_timeout_secs: 60,
            rate_per_sec: 1000.0,
            burst: 1000,
        },
        dependencies: Default::default(),
    }
}

pub struct HarnessBuilder {
    pub cycle: CycleConfig,
    pub guard: GuardConfig,
    pub source: FakeSource,
    pub stateful: FakeStateful,
    pub with_stateless: bool,
    pub page_ttl: Duration,
}

impl HarnessBuilder {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            cycle: CycleConfig {
                dry_run: false,
                ..CycleConfig::default()
            },
            guard: relaxed_guard_config(),
            source: FakeSource::with_tasks(tasks),
            stateful: FakeStateful::default(),
            with_stateless: true,
            page_ttl: Duration::ZERO,
        }
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(IdempotencyStore::open(&dir.path().join("sent.db")).expect("open store"));
        let source = Arc::new(self.source);
        let stateful = Arc::new(self.stateful);
        let stateless = Arc::new(FakeStateless::default());
        let reporter = Arc::new(RecordingReporter::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let collaborators = Collaborators {
            source: Arc::clone(&source) as Arc<dyn TaskSource>,
            stateful: Some(Arc::clone(&stateful) as Arc<dyn StatefulTransport>),
            stateless: self
                .with_stateless
                .then(|| Arc::clone(&stateless) as Arc<dyn StatelessTransport>),
            renderer: Arc::new(PlainRenderer),
            reporter: Arc::clone(&reporter) as Arc<dyn TooLateReporter>,
            metrics: Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        };
        let orchestrator = CycleOrchestrator::new(
            self.cycle,
            14,
            Arc::new(ResilienceManager::new(self.guard)),
            store,
            Arc::new(TtlCache::new("task_pages", 16, self.page_ttl)),
            collaborators,
        )
        .expect("orchestrator");
        Harness {
            orchestrator: Arc::new(orchestrator),
            source,
            stateful,
            stateless,
            reporter,
            metrics,
            _dir: dir,
        }
    }
}
