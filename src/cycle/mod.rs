//! Notification cycle orchestration.
//!
//! One cycle walks a fixed sequence of stages:
//!
//! ```text
//! Collecting -> Classifying -> Filtering -> Grouping -> Rendering
//!            -> Dispatching -> Recording -> Reporting -> Done
//! ```
//!
//! Failures are counted per task or per (task, responsible) pair and the
//! cycle carries on. The one exception is collection: if the task source
//! cannot be read the cycle ends with [`CycleOutcome::PartialFailure`], and
//! the partial report is still handed to the metrics collaborator.
//!
//! Every external call goes through the shared [`ResilienceManager`]. Locks
//! held by the store, caches and guards are released before each await.

mod types;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use duewatch_guard::{CacheKey, GuardError, ResilienceManager, TtlCache, deps};

use crate::action::{ActionKind, ActionRequest};
use crate::channels::traits::{StatefulTransport, StatelessTransport, TransportError};
use crate::classify::{TemporalBucket, classify_task, cycle_today};
use crate::config::{CycleConfig, MAX_DAY_SPAN, SourceConfig};
use crate::error::{FailureClass, Result};
use crate::idempotency::{IdempotencyKey, IdempotencyStore, StoreError};
use crate::metrics::{CycleCounters, MetricsSink};
use crate::render::{GlobalSummary, RenderedContent, Renderer};
use crate::report::TooLateReporter;
use crate::source::{FetchWindow, SourceError, TaskPage, TaskSource};
use crate::task::{Task, TaskStatus};

pub use types::{
    AckStatus, ActionAck, CycleOutcome, CycleReport, CycleRequest, CycleStage, Delivery,
    ExecutionMode, HealthReport, new_run_id,
};

/// External collaborators used by a cycle.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn TaskSource>,
    /// `None` disables stateful delivery; every pair goes stateless.
    pub stateful: Option<Arc<dyn StatefulTransport>>,
    /// `None` disables the fallback and the zero-open notice.
    pub stateless: Option<Arc<dyn StatelessTransport>>,
    pub renderer: Arc<dyn Renderer>,
    pub reporter: Arc<dyn TooLateReporter>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// A notifiable task for one responsible party.
#[derive(Debug, Clone)]
struct Pending {
    task: Task,
    bucket: TemporalBucket,
}

fn guard_class<E>(err: &GuardError<E>, failure: impl Fn(&E) -> FailureClass) -> FailureClass {
    match err {
        GuardError::CircuitOpen(_) => FailureClass::Exhausted,
        GuardError::RateLimited(_) => FailureClass::Transient,
        GuardError::Failed(e) => failure(e),
    }
}

fn store_class(_: &StoreError) -> FailureClass {
    FailureClass::Transient
}

/// Runs notification cycles and applies inbound actions.
///
/// Shared by `Arc` between the scheduler entrypoint and the gateway; one
/// instance holds the process-wide guard registry, caches and store.
pub struct CycleOrchestrator {
    config: CycleConfig,
    offset: FixedOffset,
    retention_days: u32,
    guard: Arc<ResilienceManager>,
    store: Arc<IdempotencyStore>,
    page_cache: Arc<TtlCache<TaskPage>>,
    lookup_caches: Vec<Arc<TtlCache<Vec<String>>>>,
    category: String,
    collaborators: Collaborators,
}

impl CycleOrchestrator {
    /// # Errors
    ///
    /// Returns a config error when the cycle's UTC offset does not parse.
    pub fn new(
        config: CycleConfig,
        retention_days: u32,
        guard: Arc<ResilienceManager>,
        store: Arc<IdempotencyStore>,
        page_cache: Arc<TtlCache<TaskPage>>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let offset = config.offset()?;
        Ok(Self {
            config,
            offset,
            retention_days,
            guard,
            store,
            page_cache,
            lookup_caches: Vec::new(),
            category: SourceConfig::default().category,
            collaborators,
        })
    }

    /// Task category requested from the source.
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_owned();
        self
    }

    /// Report stats of an additional lookup cache in [`health`](Self::health).
    pub fn with_lookup_cache(mut self, cache: Arc<TtlCache<Vec<String>>>) -> Self {
        self.lookup_caches.push(cache);
        self
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<IdempotencyStore> {
        &self.store
    }

    pub fn guard(&self) -> &Arc<ResilienceManager> {
        &self.guard
    }

    /// Today in the configured offset.
    pub fn today(&self) -> NaiveDate {
        cycle_today(Utc::now(), self.offset)
    }

    /// Build a request from an optional named profile or explicit horizon.
    ///
    /// An explicit horizon wins over a profile; an unknown profile falls back
    /// to the configured default horizon. Horizons above [`MAX_DAY_SPAN`]
    /// are capped.
    pub fn request(
        &self,
        profile: Option<&str>,
        horizon_days: Option<u32>,
        reason: &str,
        mode: ExecutionMode,
    ) -> CycleRequest {
        let horizon = horizon_days
            .or_else(|| {
                let name = profile?;
                let resolved = self.config.horizon_for_profile(name);
                if resolved.is_none() {
                    tracing::warn!(profile = name, "unknown horizon profile; using default horizon");
                }
                resolved
            })
            .unwrap_or(self.config.horizon_days);
        if horizon > MAX_DAY_SPAN {
            tracing::warn!(requested = horizon, limit = MAX_DAY_SPAN, "horizon too large; capping");
        }
        CycleRequest {
            horizon_days: horizon.min(MAX_DAY_SPAN),
            reason: reason.to_owned(),
            mode,
        }
    }

    pub async fn run_cycle(&self, request: CycleRequest) -> CycleReport {
        self.run_cycle_at(request, Utc::now()).await
    }

    /// Run one cycle as if the clock read `now`.
    pub async fn run_cycle_at(&self, request: CycleRequest, now: DateTime<Utc>) -> CycleReport {
        let run_id = new_run_id(now);
        let today = cycle_today(now, self.offset);
        let cutoff = self.config.overdue_cutoff_days;
        let horizon = request.horizon_days;
        let mut run = CycleRun {
            started: Instant::now(),
            report: CycleReport {
                run_id: run_id.clone(),
                reason: request.reason.clone(),
                mode: request.mode,
                cycle_date: today,
                utc_offset: self.config.utc_offset.clone(),
                horizon_days: horizon,
                overdue_cutoff_days: cutoff,
                started_at: now,
                finished_at: now,
                stage: CycleStage::Collecting,
                outcome: CycleOutcome::Completed,
                counters: CycleCounters::default(),
                dependencies: Vec::new(),
            },
        };
        tracing::info!(
            run_id = %run_id,
            reason = %request.reason,
            mode = %request.mode,
            %today,
            horizon_days = horizon,
            "notification cycle started"
        );

        if request.mode.is_live() {
            self.prune(today).await;
        }

        // Collecting
        let lookback = cutoff.max(self.config.report_lookback_days);
        let window = FetchWindow::around(today, lookback, horizon, self.config.page_size, &self.category);
        let collected = match self.collect(&window, &mut run.report.counters).await {
            Ok(tasks) => tasks,
            Err((class, reason)) => {
                tracing::error!(run_id = %run_id, %class, %reason, "task collection failed; ending cycle");
                run.report.outcome = CycleOutcome::PartialFailure { class, reason };
                return self.finish(run).await;
            }
        };

        // Classifying
        run.enter(CycleStage::Classifying);
        let mut notifiable = Vec::new();
        let mut too_late = Vec::new();
        let mut open_count = 0usize;
        for task in collected {
            if !task.status.is_open_in(&self.config.open_statuses) {
                run.report.counters.closed_filtered += 1;
                continue;
            }
            open_count += 1;
            let bucket = classify_task(&task, today, cutoff, horizon);
            run.report.counters.count_bucket(bucket);
            match bucket {
                TemporalBucket::TooLate => too_late.push(task),
                b if b.is_notifiable() => notifiable.push(Pending { task, bucket: b }),
                TemporalBucket::Unparseable => {
                    tracing::debug!(task_id = %task.id, "skipping task with unparseable due date");
                }
                _ => {}
            }
        }
        if open_count == 0 {
            self.zero_open_alert(&run.report).await;
        }

        // Filtering
        run.enter(CycleStage::Filtering);
        let mut pairs: BTreeMap<String, Vec<Pending>> = BTreeMap::new();
        let mut summary = GlobalSummary::default();
        for pending in notifiable {
            match self.is_acknowledged(&pending.task.id).await {
                Ok(false) => {}
                Ok(true) => {
                    run.report.counters.acknowledged += 1;
                    continue;
                }
                Err(class) => {
                    tracing::warn!(task_id = %pending.task.id, %class, "could not check acknowledgment; skipping task");
                    run.report.counters.count_failure(class);
                    continue;
                }
            }
            if pending.task.responsibles.is_empty() {
                run.report.counters.unassigned += 1;
                tracing::warn!(task_id = %pending.task.id, "notifiable task has no responsible");
                continue;
            }
            let responsibles: Vec<String> = dedup_responsibles(&pending.task.responsibles);
            for responsible in responsibles {
                summary.add(&pending.task.id, &responsible);
                let key = IdempotencyKey::new(&pending.task.id, &responsible, today);
                match self.was_sent(&key).await {
                    Ok(true) => run.report.counters.deduplicated += 1,
                    Ok(false) => pairs.entry(responsible).or_default().push(pending.clone()),
                    Err(class) => {
                        tracing::warn!(key = %key, %class, "could not check idempotency; skipping pair");
                        run.report.counters.count_failure(class);
                    }
                }
            }
        }

        // Grouping
        run.enter(CycleStage::Grouping);
        let mut groups: Vec<(String, Vec<Pending>)> = pairs.into_iter().collect();
        groups.sort_by(|(a_id, a), (b_id, b)| b.len().cmp(&a.len()).then_with(|| a_id.cmp(b_id)));
        if groups.len() > self.config.max_responsibles {
            let dropped = groups.len() - self.config.max_responsibles;
            tracing::warn!(
                run_id = %run_id,
                dropped,
                limit = self.config.max_responsibles,
                "responsible limit reached; truncating"
            );
            run.report.counters.responsibles_truncated = dropped;
            groups.truncate(self.config.max_responsibles);
        }
        if self.config.send_global_summary {
            self.send_global_summary(&mut run, &summary).await;
        }

        // Rendering, Dispatching and Recording run per pair.
        for (responsible, pending) in groups {
            let mut reached = false;
            for item in pending {
                if self.process_pair(&mut run, &responsible, &item, today, now).await {
                    reached = true;
                }
            }
            if reached {
                run.report.counters.responsibles_notified += 1;
            }
        }

        // Reporting
        run.enter(CycleStage::Reporting);
        if let Err(err) = self.collaborators.reporter.record_too_late(&too_late, today).await {
            tracing::warn!(run_id = %run_id, error = %err, "too-late report failed");
        }

        self.finish(run).await
    }

    async fn prune(&self, today: NaiveDate) {
        let store = &self.store;
        let retention = self.retention_days;
        match self
            .guard
            .execute(deps::STORAGE, || async move { store.prune(retention, today) })
            .await
        {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "pruned idempotency records"),
            Err(err) => tracing::warn!(error = %err, "idempotency prune failed"),
        }
    }

    /// Paginated collection through the task-source guard, page cache first.
    async fn collect(
        &self,
        window: &FetchWindow,
        counters: &mut CycleCounters,
    ) -> std::result::Result<Vec<Task>, (FailureClass, String)> {
        let start = window.start.format("%Y-%m-%d").to_string();
        let end = window.end.format("%Y-%m-%d").to_string();
        let size = window.page_size.to_string();
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page_label = token.clone().unwrap_or_else(|| "first".to_owned());
            let key = CacheKey::structured(
                "task_pages",
                &[
                    ("category", window.category.as_str()),
                    ("start", start.as_str()),
                    ("end", end.as_str()),
                    ("size", size.as_str()),
                    ("page", page_label.as_str()),
                ],
            );
            let page = match self.page_cache.get(&key) {
                Some(hit) => {
                    counters.page_cache_hits += 1;
                    hit
                }
                None => {
                    let source = &self.collaborators.source;
                    let page_token = token.as_deref();
                    let fetched = self
                        .guard
                        .execute(deps::TASK_SOURCE, || async move {
                            source.fetch_page(window, page_token).await
                        })
                        .await
                        .map_err(|err| {
                            let class = guard_class(&err, SourceError::class);
                            (class, err.to_string())
                        })?;
                    self.page_cache.insert(&key, fetched.clone());
                    fetched
                }
            };
            pages += 1;
            counters.pages_fetched += 1;

            for task in page.tasks {
                if seen.insert(task.id.clone()) {
                    tasks.push(task);
                }
            }
            counters.collected = tasks.len();

            let Some(next) = page.next_page else {
                break;
            };
            if !self.config.full_scan {
                tracing::debug!("full scan disabled; stopping after first page");
                break;
            }
            if self.config.max_pages.is_some_and(|max| pages >= max) {
                tracing::warn!(pages, "page limit reached; collection truncated");
                break;
            }
            token = Some(next);
        }
        Ok(tasks)
    }

    async fn is_acknowledged(&self, task_id: &str) -> std::result::Result<bool, FailureClass> {
        let store = &self.store;
        self.guard
            .execute(deps::STORAGE, || async move { store.is_acknowledged(task_id) })
            .await
            .map_err(|err| guard_class(&err, store_class))
    }

    async fn was_sent(&self, key: &IdempotencyKey) -> std::result::Result<bool, FailureClass> {
        let store = &self.store;
        self.guard
            .execute(deps::STORAGE, || async move { store.was_sent(key) })
            .await
            .map_err(|err| guard_class(&err, store_class))
    }

    /// Render, dispatch and record one pair. Returns `true` when the message
    /// reached the responsible (or was previewed in a dry run).
    async fn process_pair(
        &self,
        run: &mut CycleRun,
        responsible: &str,
        item: &Pending,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> bool {
        let key = IdempotencyKey::new(&item.task.id, responsible, today);
        let Some(_claim) = self.store.claim(&key) else {
            tracing::debug!(key = %key, "pair claimed by an overlapping cycle");
            run.report.counters.in_flight_skipped += 1;
            return false;
        };
        // A concurrent cycle may have recorded the pair between filtering and claiming.
        match self.was_sent(&key).await {
            Ok(false) => {}
            Ok(true) => {
                run.report.counters.deduplicated += 1;
                return false;
            }
            Err(class) => {
                tracing::warn!(key = %key, %class, "could not recheck idempotency; skipping pair");
                run.report.counters.count_failure(class);
                return false;
            }
        }

        run.enter(CycleStage::Rendering);
        let content = self
            .collaborators
            .renderer
            .render(&item.task, responsible, item.bucket);

        if !run.report.mode.is_live() {
            tracing::info!(
                run_id = %run.report.run_id,
                responsible,
                task_id = %item.task.id,
                bucket = %item.bucket,
                text = %content.text,
                "dry run: message not sent"
            );
            run.report.counters.previewed += 1;
            return true;
        }

        run.enter(CycleStage::Dispatching);
        let delivery = match self.dispatch(responsible, &content, &mut run.report.counters).await {
            Ok(delivery) => delivery,
            Err(class) => {
                tracing::warn!(key = %key, %class, "notification not delivered");
                run.report.counters.count_failure(class);
                return false;
            }
        };
        match delivery {
            Delivery::Stateful => run.report.counters.dispatched_stateful += 1,
            Delivery::Stateless => run.report.counters.dispatched_stateless += 1,
        }

        run.enter(CycleStage::Recording);
        let store = &self.store;
        let key_ref = &key;
        let recorded = self
            .guard
            .execute(deps::STORAGE, || async move { store.mark_sent(key_ref, now) })
            .await;
        if let Err(err) = recorded {
            tracing::error!(key = %key, error = %err, "sent but not recorded; may repeat next cycle");
            run.report.counters.record_failures += 1;
        }
        true
    }

    /// Stateful first when a session exists, stateless otherwise or on failure.
    async fn dispatch(
        &self,
        responsible: &str,
        content: &RenderedContent,
        counters: &mut CycleCounters,
    ) -> std::result::Result<Delivery, FailureClass> {
        // No route at all counts as exhausted.
        let mut last_class = FailureClass::Exhausted;
        let mut tried_stateful = false;

        if let Some(stateful) = self.collaborators.stateful.as_ref() {
            if stateful.has_session(responsible) {
                tried_stateful = true;
                let result = self
                    .guard
                    .execute(deps::STATEFUL_TRANSPORT, || async move {
                        stateful.send(responsible, content).await
                    })
                    .await;
                match result {
                    Ok(()) => return Ok(Delivery::Stateful),
                    Err(err) => {
                        last_class = guard_class(&err, TransportError::class);
                        tracing::warn!(responsible, error = %err, "stateful delivery failed; falling back");
                    }
                }
            }
        }

        let Some(stateless) = self.collaborators.stateless.as_ref() else {
            if !tried_stateful {
                tracing::warn!(responsible, "no session and no stateless transport configured");
            }
            return Err(last_class);
        };
        let result = self
            .guard
            .execute(deps::STATELESS_TRANSPORT, || async move { stateless.send(content).await })
            .await;
        match result {
            Ok(()) => {
                if tried_stateful {
                    counters.stateless_fallbacks += 1;
                }
                Ok(Delivery::Stateless)
            }
            Err(err) => {
                tracing::warn!(responsible, error = %err, "stateless delivery failed");
                Err(guard_class(&err, TransportError::class))
            }
        }
    }

    /// One summary of the cycle through the stateless transport; logged only
    /// in a dry run.
    async fn send_global_summary(&self, run: &mut CycleRun, summary: &GlobalSummary) {
        let content = summary.render(run.report.cycle_date);
        if !run.report.mode.is_live() {
            tracing::info!(run_id = %run.report.run_id, text = %content.text, "dry run: global summary not sent");
            return;
        }
        let Some(stateless) = self.collaborators.stateless.as_ref() else {
            tracing::warn!(run_id = %run.report.run_id, "global summary enabled but no stateless transport");
            return;
        };
        let content = &content;
        match self
            .guard
            .execute(deps::STATELESS_TRANSPORT, || async move { stateless.send(content).await })
            .await
        {
            Ok(()) => run.report.counters.summaries_sent += 1,
            Err(err) => tracing::warn!(run_id = %run.report.run_id, error = %err, "global summary not delivered"),
        }
    }

    async fn zero_open_alert(&self, report: &CycleReport) {
        if !self.config.alert_on_zero_open {
            return;
        }
        tracing::warn!(run_id = %report.run_id, "task source returned no open tasks");
        if !report.mode.is_live() {
            return;
        }
        let Some(stateless) = self.collaborators.stateless.as_ref() else {
            return;
        };
        let notice = RenderedContent::text(format!(
            "No open tasks were returned for {} (run {}). Check the task source.",
            report.cycle_date, report.run_id
        ));
        let notice = &notice;
        if let Err(err) = self
            .guard
            .execute(deps::STATELESS_TRANSPORT, || async move { stateless.send(notice).await })
            .await
        {
            tracing::warn!(error = %err, "zero-open notice not delivered");
        }
    }

    async fn finish(&self, mut run: CycleRun) -> CycleReport {
        run.enter(CycleStage::Done);
        let elapsed = chrono::Duration::from_std(run.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        run.report.finished_at = run.report.started_at + elapsed;
        run.report.dependencies = self.guard.snapshot();
        let counters = &run.report.counters;
        tracing::info!(
            run_id = %run.report.run_id,
            outcome = %run.report.outcome,
            collected = counters.collected,
            dispatched = counters.dispatched(),
            previewed = counters.previewed,
            deduplicated = counters.deduplicated,
            failed = counters.failed,
            too_late = counters.bucket(TemporalBucket::TooLate),
            "notification cycle finished"
        );
        if let Err(err) = self.collaborators.metrics.record_cycle(&run.report).await {
            tracing::warn!(run_id = %run.report.run_id, error = %err, "cycle metrics not recorded");
        }
        run.report
    }

    pub async fn apply_action(&self, request: ActionRequest) -> ActionAck {
        self.apply_action_at(request, Utc::now()).await
    }

    /// Apply an inbound action. Always produces an ack; failures are reported
    /// in it rather than returned.
    pub async fn apply_action_at(&self, request: ActionRequest, now: DateTime<Utc>) -> ActionAck {
        let task_id = request.task_id.trim().to_owned();
        let target = match &request.action {
            ActionKind::Dismiss => Some(TaskStatus::Dismissed),
            ActionKind::Finalize if self.config.finalize_updates_source => Some(TaskStatus::Finalized),
            ActionKind::Finalize => None,
            ActionKind::Unknown(label) => {
                tracing::info!(task_id = %task_id, label = %label, "ignoring unknown action");
                return ActionAck::new(&request, AckStatus::Ignored, format!("unknown action {label:?}"));
            }
        };

        let updates_source = target.is_some();
        if let Some(status) = target {
            let source = &self.collaborators.source;
            let id = task_id.as_str();
            let code = status.code().to_owned();
            let result = self
                .guard
                .execute(deps::TASK_SOURCE, || async move { source.update_status(id, status).await })
                .await;
            if let Err(err) = result {
                tracing::warn!(task_id = %task_id, error = %err, "status update failed");
                return ActionAck::new(&request, AckStatus::Failed, err.to_string());
            }
            tracing::info!(task_id = %task_id, status = %code, "task status updated");
        }

        let store = &self.store;
        let day = cycle_today(now, self.offset);
        let label = request.action.as_str().to_owned();
        let (id, action) = (task_id.as_str(), label.as_str());
        let recorded = self
            .guard
            .execute(deps::STORAGE, || async move { store.acknowledge(id, action, day, now) })
            .await;
        match recorded {
            Ok(()) => ActionAck::new(&request, AckStatus::Applied, "acknowledged".to_owned()),
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "acknowledgment not recorded");
                if updates_source {
                    ActionAck::new(
                        &request,
                        AckStatus::Applied,
                        format!("source updated; local acknowledgment failed: {err}"),
                    )
                } else {
                    ActionAck::new(
                        &request,
                        AckStatus::Failed,
                        format!("local acknowledgment failed: {err}"),
                    )
                }
            }
        }
    }

    /// Guard state and cache stats for the health endpoint.
    pub fn health(&self) -> HealthReport {
        let mut caches = BTreeMap::new();
        caches.insert(self.page_cache.name().to_owned(), self.page_cache.stats());
        for cache in &self.lookup_caches {
            caches.insert(cache.name().to_owned(), cache.stats());
        }
        HealthReport {
            status: "ok",
            dependencies: self.guard.snapshot(),
            caches,
        }
    }
}

/// Mutable state of a cycle in progress.
struct CycleRun {
    started: Instant,
    report: CycleReport,
}

impl CycleRun {
    fn enter(&mut self, stage: CycleStage) {
        if self.report.stage != stage {
            tracing::debug!(run_id = %self.report.run_id, ?stage, "cycle stage");
            self.report.stage = stage;
        }
    }
}

/// Trimmed, non-empty responsibles without case-insensitive duplicates.
fn dedup_responsibles(responsibles: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    responsibles
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty() && seen.insert(r.to_lowercase()))
        .map(str::to_owned)
        .collect()
}
