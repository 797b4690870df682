//! Startup wiring: builds the process-wide orchestrator from configuration.
//!
//! [`build_orchestrator`] is called once per process. It opens (and prunes)
//! the idempotency store, creates the single [`ResilienceManager`] and the
//! per-category caches, and instantiates the bundled collaborators.
//!
//! [`preflight`] is the read-only counterpart used by `duewatch check-config`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use duewatch_guard::{ResilienceManager, TtlCache};

use crate::channels::traits::{StatefulTransport, StatelessTransport};
use crate::channels::{BotTransport, SessionRegistry, WebhookTransport};
use crate::classify::cycle_today;
use crate::config::{CacheCategoryConfig, DuewatchConfig};
use crate::cycle::{Collaborators, CycleOrchestrator};
use crate::error::{NotifyError, Result};
use crate::idempotency::IdempotencyStore;
use crate::metrics::JsonlMetrics;
use crate::render::CardRenderer;
use crate::report::CsvTooLateReport;
use crate::source::{HttpTaskSource, TaskPage};

fn cache<V: Clone>(name: &str, config: &CacheCategoryConfig) -> Arc<TtlCache<V>> {
    Arc::new(TtlCache::new(
        name,
        config.capacity,
        Duration::from_secs(config.ttl_secs),
    ))
}

/// Open the idempotency store named by `config`, pruning expired entries.
///
/// # Errors
///
/// Returns [`NotifyError::Storage`] when the database cannot be opened.
pub fn open_store(config: &DuewatchConfig) -> Result<IdempotencyStore> {
    let today = cycle_today(Utc::now(), config.cycle.offset()?);
    let path = config.idempotency.resolved_db_path();
    IdempotencyStore::open_and_prune(&path, config.idempotency.retention_days, today)
        .map_err(|e| NotifyError::Storage(format!("{}: {e}", path.display())))
}

/// Wire the orchestrator and its bundled collaborators.
///
/// # Errors
///
/// Fails on invalid configuration, an unreadable store or session registry,
/// or an HTTP client that cannot be built.
pub fn build_orchestrator(config: &DuewatchConfig) -> Result<CycleOrchestrator> {
    config.validate()?;
    let store = Arc::new(open_store(config)?);
    let guard = Arc::new(ResilienceManager::new(config.resilience.clone()));
    let page_cache: Arc<TtlCache<TaskPage>> = cache("task_pages", &config.cache.task_pages);
    let lookup_cache: Arc<TtlCache<Vec<String>>> =
        cache("responsibles", &config.cache.responsibles);

    let source = HttpTaskSource::new(&config.source, Arc::clone(&lookup_cache))?;

    let stateful: Option<Arc<dyn StatefulTransport>> = if config.bot.enabled {
        let path = config.bot.resolved_sessions_path();
        let registry = SessionRegistry::load(&path, config.bot.test_recipient.clone())?;
        tracing::info!(
            sessions = registry.len(),
            path = %path.display(),
            "conversation references loaded"
        );
        Some(Arc::new(BotTransport::new(&config.bot, registry)?))
    } else {
        tracing::info!("bot transport disabled; notifications go to the webhook");
        None
    };

    let stateless: Option<Arc<dyn StatelessTransport>> = match WebhookTransport::from_config(&config.webhook)? {
        Some(webhook) => Some(Arc::new(webhook)),
        None => {
            tracing::warn!("no webhook configured; pairs without a session cannot be delivered");
            None
        }
    };

    let collaborators = Collaborators {
        source: Arc::new(source),
        stateful,
        stateless,
        renderer: Arc::new(CardRenderer::from_config(&config.source)),
        reporter: Arc::new(CsvTooLateReport::new(config.output.resolved_report_dir())),
        metrics: Arc::new(JsonlMetrics::new(config.output.resolved_metrics_dir())),
    };

    let orchestrator = CycleOrchestrator::new(
        config.cycle.clone(),
        config.idempotency.retention_days,
        guard,
        store,
        page_cache,
        collaborators,
    )?
    .with_category(&config.source.category)
    .with_lookup_cache(lookup_cache);
    Ok(orchestrator)
}

/// Severity of a preflight finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightSeverity {
    Warning,
    Error,
}

impl std::fmt::Display for PreflightSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One finding surfaced by `check-config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightIssue {
    pub id: &'static str,
    pub severity: PreflightSeverity,
    pub summary: String,
}

impl PreflightIssue {
    fn error(id: &'static str, summary: impl Into<String>) -> Self {
        Self {
            id,
            severity: PreflightSeverity::Error,
            summary: summary.into(),
        }
    }

    fn warning(id: &'static str, summary: impl Into<String>) -> Self {
        Self {
            id,
            severity: PreflightSeverity::Warning,
            summary: summary.into(),
        }
    }
}

/// Check `config` without touching the network or the store.
pub fn preflight(config: &DuewatchConfig) -> Vec<PreflightIssue> {
    let mut issues = Vec::new();

    if let Err(e) = config.validate() {
        issues.push(PreflightIssue::error("config.invalid", e.to_string()));
    }

    if url::Url::parse(&config.source.base_url).is_err() {
        issues.push(PreflightIssue::error(
            "source.base_url",
            format!("source.base_url {:?} is not a valid URL", config.source.base_url),
        ));
    }
    if config.source.client_id.trim().is_empty() || config.source.client_secret.trim().is_empty() {
        issues.push(PreflightIssue::error(
            "source.credentials",
            "source.client_id and source.client_secret (or DUEWATCH_SOURCE_CLIENT_SECRET) are required",
        ));
    }

    let webhook_set = config
        .webhook
        .url
        .as_deref()
        .is_some_and(|u| !u.trim().is_empty());
    if config.bot.enabled {
        if config.bot.app_id.trim().is_empty() || config.bot.app_password.trim().is_empty() {
            issues.push(PreflightIssue::error(
                "bot.credentials",
                "bot.app_id and bot.app_password are required when the bot is enabled",
            ));
        }
        let path = config.bot.resolved_sessions_path();
        match SessionRegistry::load(&path, None) {
            Ok(registry) if registry.is_empty() => issues.push(PreflightIssue::warning(
                "bot.sessions",
                format!("no conversation references in {}", path.display()),
            )),
            Ok(_) => {}
            Err(e) => issues.push(PreflightIssue::error("bot.sessions", e.to_string())),
        }
        if config.bot.test_recipient.is_some() {
            issues.push(PreflightIssue::warning(
                "bot.test_recipient",
                "test_recipient is set; every bot message is redirected",
            ));
        }
    } else if !webhook_set {
        issues.push(PreflightIssue::error(
            "transport.none",
            "neither the bot nor a webhook is configured; nothing can be delivered",
        ));
    }
    if let Some(raw) = config.webhook.url.as_deref().filter(|_| webhook_set) {
        if let Err(e) = url::Url::parse(raw.trim()) {
            issues.push(PreflightIssue::error(
                "webhook.url",
                format!("webhook.url is not a valid URL: {e}"),
            ));
        }
    }

    if config.gateway.bearer_token.as_deref().is_none_or(|t| t.trim().is_empty()) {
        issues.push(PreflightIssue::warning(
            "gateway.bearer_token",
            "inbound gateway accepts unauthenticated requests",
        ));
    }
    if config.cycle.dry_run {
        issues.push(PreflightIssue::warning(
            "cycle.dry_run",
            "dry_run is on; cycles render but never send (use --live)",
        ));
    }

    issues
}
