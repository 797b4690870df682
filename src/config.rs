//! Configuration types for notification cycles and their collaborators.
//!
//! Loaded from TOML (`~/.config/duewatch/config.toml` by default). Every
//! section carries `#[serde(default)]`, so a partial file only overrides the
//! keys it names. Secrets are usually supplied through environment variables
//! and merged with [`DuewatchConfig::apply_env_overrides`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::FixedOffset;
use duewatch_guard::{DependencyPolicy, GuardConfig, deps};
use serde::{Deserialize, Serialize};

use crate::error::{NotifyError, Result};

/// Upper bound for every configured span of days.
pub const MAX_DAY_SPAN: u32 = 3650;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuewatchConfig {
    /// Classification windows, filters and run behaviour.
    pub cycle: CycleConfig,
    /// Sent-notification store.
    pub idempotency: IdempotencyConfig,
    /// Per-category cache sizing.
    pub cache: CacheConfig,
    /// Breaker and rate-limit policy per dependency.
    pub resilience: GuardConfig,
    /// Task source REST API.
    pub source: SourceConfig,
    /// Stateful (conversational bot) transport.
    pub bot: BotConfig,
    /// Stateless (incoming webhook) transport.
    pub webhook: WebhookConfig,
    /// Inbound action gateway.
    pub gateway: GatewayConfig,
    /// Report and metrics output locations.
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Default for DuewatchConfig {
    fn default() -> Self {
        Self {
            cycle: CycleConfig::default(),
            idempotency: IdempotencyConfig::default(),
            cache: CacheConfig::default(),
            resilience: default_resilience(),
            source: SourceConfig::default(),
            bot: BotConfig::default(),
            webhook: WebhookConfig::default(),
            gateway: GatewayConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Policies for the four pipeline dependencies, so their guards exist from
/// startup rather than on first use.
fn default_resilience() -> GuardConfig {
    GuardConfig::default()
        .with_policy(
            deps::TASK_SOURCE,
            DependencyPolicy {
                failure_threshold: 5,
                recovery_timeout_secs: 60,
                rate_per_sec: 5.0,
                burst: 10,
            },
        )
        .with_policy(
            deps::STATEFUL_TRANSPORT,
            DependencyPolicy {
                failure_threshold: 5,
                recovery_timeout_secs: 120,
                rate_per_sec: 2.0,
                burst: 5,
            },
        )
        .with_policy(
            deps::STATELESS_TRANSPORT,
            DependencyPolicy {
                failure_threshold: 3,
                recovery_timeout_secs: 120,
                rate_per_sec: 1.0,
                burst: 5,
            },
        )
        .with_policy(
            deps::STORAGE,
            DependencyPolicy {
                failure_threshold: 3,
                recovery_timeout_secs: 30,
                rate_per_sec: 100.0,
                burst: 200,
            },
        )
}

/// How a cycle classifies, filters and dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Days ahead that count as "due soon".
    pub horizon_days: u32,
    /// Days overdue that still get a reminder; older tasks go to the report.
    pub overdue_cutoff_days: u32,
    /// Days back the collection window reaches so tasks past the cutoff
    /// still land in the too-late report.
    pub report_lookback_days: u32,
    /// Fixed UTC offset used to compute "today", e.g. `-03:00`.
    pub utc_offset: String,
    /// Status codes considered open.
    pub open_statuses: Vec<String>,
    /// Named horizon presets selectable per run.
    pub profiles: BTreeMap<String, u32>,
    /// Tasks requested per page.
    pub page_size: u32,
    /// Walk every page (`true`) or only the first.
    pub full_scan: bool,
    /// Upper bound on pages fetched in one cycle.
    pub max_pages: Option<u32>,
    /// Upper bound on responsible parties notified in one cycle.
    pub max_responsibles: usize,
    /// Render and log without dispatching or recording.
    pub dry_run: bool,
    /// Post a notice when the source reports no open task at all.
    pub alert_on_zero_open: bool,
    /// Whether an inbound Finalize also updates the task source.
    pub finalize_updates_source: bool,
    /// Post one summary of the cycle through the stateless transport.
    pub send_global_summary: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            horizon_days: 3,
            overdue_cutoff_days: 1,
            report_lookback_days: 30,
            utc_offset: "-03:00".to_owned(),
            open_statuses: ["A", "P", "Q", "S"].iter().map(|s| (*s).to_owned()).collect(),
            profiles: BTreeMap::from([("afternoon".to_owned(), 1), ("morning".to_owned(), 3)]),
            page_size: 50,
            full_scan: true,
            max_pages: None,
            max_responsibles: 50,
            dry_run: true,
            alert_on_zero_open: false,
            finalize_updates_source: false,
            send_global_summary: false,
        }
    }
}

impl CycleConfig {
    /// The configured offset, parsed.
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }

    pub fn horizon_for_profile(&self, profile: &str) -> Option<u32> {
        self.profiles.get(&profile.trim().to_lowercase()).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// SQLite file. Defaults to the data directory.
    pub db_path: Option<PathBuf>,
    /// Days of history to keep.
    pub retention_days: u32,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            retention_days: 14,
        }
    }
}

impl IdempotencyConfig {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(crate::paths::idempotency_db_file)
    }
}

/// Size and lifetime of one cache category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheCategoryConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheCategoryConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Paged task listings.
    pub task_pages: CacheCategoryConfig,
    /// Responsible-party lookups per task.
    pub responsibles: CacheCategoryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            task_pages: CacheCategoryConfig {
                capacity: 200,
                ttl_secs: 180,
            },
            responsibles: CacheCategoryConfig {
                capacity: 2_000,
                ttl_secs: 600,
            },
        }
    }
}

/// Task source REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// OAuth token endpoint. Defaults to `{base_url}/oauth/token`.
    pub token_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Task category requested from the source.
    pub category: String,
    /// Web application root used for task deep links.
    pub app_url: String,
    /// Company identifier appended to deep links, when known.
    pub company_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.gclick.com.br".to_owned(),
            token_url: None,
            client_id: String::new(),
            client_secret: String::new(),
            category: "Obrigacao".to_owned(),
            app_url: "https://app.gclick.com.br".to_owned(),
            company_id: None,
            timeout_secs: 20,
        }
    }
}

impl SourceConfig {
    pub fn resolved_token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/token", self.base_url.trim_end_matches('/')))
    }
}

/// Bot Framework proactive-messaging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub enabled: bool,
    pub app_id: String,
    pub app_password: String,
    pub token_url: String,
    pub scope: String,
    /// Conversation reference registry. Defaults to the data directory.
    pub sessions_path: Option<PathBuf>,
    /// When set, every notification goes to this responsible id instead.
    pub test_recipient: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_id: String::new(),
            app_password: String::new(),
            token_url: "https://login.microsoftonline.com/botframework.com/oauth2/v2.0/token"
                .to_owned(),
            scope: "https://api.botframework.com/.default".to_owned(),
            sessions_path: None,
            test_recipient: None,
            timeout_secs: 15,
        }
    }
}

impl BotConfig {
    pub fn resolved_sessions_path(&self) -> PathBuf {
        self.sessions_path
            .clone()
            .unwrap_or_else(crate::paths::sessions_file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Incoming-webhook URL. Unset disables the stateless transport.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// When set, inbound requests must carry `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 3978,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub report_dir: Option<PathBuf>,
    pub metrics_dir: Option<PathBuf>,
}

impl OutputConfig {
    pub fn resolved_report_dir(&self) -> PathBuf {
        self.report_dir.clone().unwrap_or_else(crate::paths::reports_dir)
    }

    pub fn resolved_metrics_dir(&self) -> PathBuf {
        self.metrics_dir.clone().unwrap_or_else(crate::paths::metrics_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily-rolling log files. Unset logs to stderr only.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "duewatch=info,duewatch_guard=info".to_owned(),
            dir: None,
        }
    }
}

impl DuewatchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| NotifyError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| NotifyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/duewatch/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_dir().join("config.toml")
    }

    /// Merge `DUEWATCH_*` variables into this config.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`; tests pass a map.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] when a numeric or boolean override
    /// cannot be parsed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DUEWATCH_SOURCE_BASE_URL") {
            self.source.base_url = v;
        }
        if let Some(v) = get("DUEWATCH_SOURCE_CLIENT_ID") {
            self.source.client_id = v;
        }
        if let Some(v) = get("DUEWATCH_SOURCE_CLIENT_SECRET") {
            self.source.client_secret = v;
        }
        if let Some(v) = get("DUEWATCH_BOT_APP_ID") {
            self.bot.app_id = v;
        }
        if let Some(v) = get("DUEWATCH_BOT_APP_PASSWORD") {
            self.bot.app_password = v;
        }
        if let Some(v) = get("DUEWATCH_TEST_RECIPIENT") {
            self.bot.test_recipient = Some(v);
        }
        if let Some(v) = get("DUEWATCH_WEBHOOK_URL") {
            self.webhook.url = Some(v);
        }
        if let Some(v) = get("DUEWATCH_GATEWAY_TOKEN") {
            self.gateway.bearer_token = Some(v);
        }
        if let Some(v) = get("DUEWATCH_UTC_OFFSET") {
            self.cycle.utc_offset = v;
        }
        if let Some(v) = get("DUEWATCH_HORIZON_DAYS") {
            self.cycle.horizon_days = parse_env_number("DUEWATCH_HORIZON_DAYS", &v)?;
        }
        if let Some(v) = get("DUEWATCH_OVERDUE_CUTOFF_DAYS") {
            self.cycle.overdue_cutoff_days = parse_env_number("DUEWATCH_OVERDUE_CUTOFF_DAYS", &v)?;
        }
        if let Some(v) = get("DUEWATCH_DRY_RUN") {
            self.cycle.dry_run = parse_env_bool("DUEWATCH_DRY_RUN", &v)?;
        }
        Ok(())
    }

    /// Validates this configuration.
    ///
    /// Checks:
    /// - `cycle.utc_offset` parses as a fixed offset
    /// - `cycle.page_size` and `idempotency.retention_days` are greater than 0
    /// - `cycle.open_statuses` is not empty
    /// - day spans (horizon, cutoff, lookback, profiles, retention) are at
    ///   most [`MAX_DAY_SPAN`]
    /// - every resilience policy is valid
    pub fn validate(&self) -> Result<()> {
        self.cycle.offset()?;
        let day_spans = [
            ("cycle.horizon_days", self.cycle.horizon_days),
            ("cycle.overdue_cutoff_days", self.cycle.overdue_cutoff_days),
            ("cycle.report_lookback_days", self.cycle.report_lookback_days),
            ("idempotency.retention_days", self.idempotency.retention_days),
        ];
        let profile_spans = self.cycle.profiles.values().map(|d| ("cycle.profiles", *d));
        for (name, days) in day_spans.into_iter().chain(profile_spans) {
            if days > MAX_DAY_SPAN {
                return Err(NotifyError::Config(format!(
                    "{name} must be at most {MAX_DAY_SPAN} days (got {days})"
                )));
            }
        }
        if self.cycle.page_size == 0 {
            return Err(NotifyError::Config(
                "cycle.page_size must be greater than 0".into(),
            ));
        }
        if self.cycle.open_statuses.is_empty() {
            return Err(NotifyError::Config(
                "cycle.open_statuses must not be empty".into(),
            ));
        }
        if self.cycle.max_pages == Some(0) {
            return Err(NotifyError::Config(
                "cycle.max_pages must be greater than 0 when set".into(),
            ));
        }
        if self.idempotency.retention_days == 0 {
            return Err(NotifyError::Config(
                "idempotency.retention_days must be greater than 0".into(),
            ));
        }
        self.resilience
            .validate()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(())
    }
}

/// Parse `Z`, `UTC`, `±HH`, `±HHMM` or `±HH:MM` into a [`FixedOffset`].
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let invalid = || NotifyError::Config(format!("invalid utc_offset {raw:?}"));
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn parse_env_number(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| NotifyError::Config(format!("{key} must be a non-negative integer")))
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NotifyError::Config(format!("{key} must be a boolean"))),
    }
}
