//! Message rendering.
//!
//! A [`Renderer`] turns one (task, responsible, bucket) triple into a
//! [`RenderedContent`]: a plain-text body that every transport can deliver and
//! an optional rich card for transports that support one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;

use crate::classify::TemporalBucket;
use crate::config::SourceConfig;
use crate::task::Task;

/// Rendered message for one (task, responsible) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedContent {
    /// Plain fallback, used as-is by stateless transports.
    pub text: String,
    /// Adaptive Card body, when the renderer produces one.
    pub card: Option<Value>,
}

impl RenderedContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            card: None,
        }
    }
}

/// Cycle-wide totals over every pending (task, responsible) pair, counted
/// before same-day deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSummary {
    per_responsible: BTreeMap<String, usize>,
    tasks: BTreeSet<String>,
}

impl GlobalSummary {
    pub fn add(&mut self, task_id: &str, responsible: &str) {
        *self.per_responsible.entry(responsible.to_owned()).or_default() += 1;
        self.tasks.insert(task_id.to_owned());
    }

    pub fn responsibles(&self) -> usize {
        self.per_responsible.len()
    }

    pub fn distinct_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Pairs summed over responsibles; a shared task counts once per person.
    pub fn occurrences(&self) -> usize {
        self.per_responsible.values().sum()
    }

    pub fn render(&self, day: NaiveDate) -> RenderedContent {
        RenderedContent::text(format!(
            "Obligations summary for {}\n\
             - Responsibles with pending items: {}\n\
             - Distinct tasks: {}\n\
             - Total occurrences (per responsible): {}",
            day.format("%d/%m/%Y"),
            self.responsibles(),
            self.distinct_tasks(),
            self.occurrences()
        ))
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, task: &Task, responsible: &str, bucket: TemporalBucket) -> RenderedContent;
}

fn urgency_line(task: &Task, bucket: TemporalBucket) -> String {
    let due = task
        .due_date
        .map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "unknown date".to_owned());
    match bucket {
        TemporalBucket::Overdue => format!("Overdue since {due}. Action needed now."),
        TemporalBucket::DueToday => "Due TODAY. Act immediately.".to_owned(),
        TemporalBucket::DueSoon => format!("Due on {due}. Plan ahead."),
        TemporalBucket::TooLate => format!("Overdue since {due}, past the follow-up window."),
        TemporalBucket::NotYet => format!("Due on {due}."),
        TemporalBucket::Unparseable => "Check the deadline of this task.".to_owned(),
    }
}

fn urgency_color(bucket: TemporalBucket) -> &'static str {
    match bucket {
        TemporalBucket::Overdue | TemporalBucket::TooLate => "Attention",
        TemporalBucket::DueToday => "Warning",
        _ => "Accent",
    }
}

/// Split a composite task id such as `"4.12345"` into its numeric halves.
fn split_composite_id(id: &str) -> Option<(u64, u64)> {
    let id = id.trim();
    let first_end = id.find(|c: char| !c.is_ascii_digit())?;
    let (head, rest) = id.split_at(first_end);
    let tail = rest.trim_start_matches(|c: char| !c.is_ascii_digit());
    if head.is_empty() || tail.is_empty() || !tail.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((head.parse().ok()?, tail.parse().ok()?))
}

/// Adaptive Card 1.3 renderer with deep links into the task web app.
#[derive(Debug, Clone)]
pub struct CardRenderer {
    app_url: Option<Url>,
    company_id: Option<String>,
}

impl CardRenderer {
    pub fn new(app_url: &str, company_id: Option<String>) -> Self {
        let app_url = match Url::parse(app_url) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(app_url, error = %err, "invalid app_url; cards will have no link");
                None
            }
        };
        Self { app_url, company_id }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.app_url, config.company_id.clone())
    }

    /// Deep link for a task, when the app url is usable.
    pub fn task_link(&self, task_id: &str) -> Option<String> {
        let base = self.app_url.as_ref()?;
        let url = match split_composite_id(task_id) {
            Some((coid, event_id)) => {
                let mut url = base.join("coListar.do").ok()?;
                {
                    let mut query = url.query_pairs_mut();
                    query
                        .append_pair("obj", "coevento")
                        .append_pair("coid", &coid.to_string())
                        .append_pair("eveId", &event_id.to_string());
                    if let Some(company) = self.company_id.as_deref() {
                        query.append_pair("empId", company);
                    }
                }
                url
            }
            None => {
                let mut url = base.clone();
                url.path_segments_mut().ok()?.pop_if_empty().push("tarefas").push(task_id.trim());
                url
            }
        };
        Some(url.into())
    }

    fn card(&self, task: &Task, responsible: &str, bucket: TemporalBucket, link: Option<&str>) -> Value {
        let due = task
            .due_date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| "-".to_owned());
        let mut actions = Vec::new();
        if let Some(link) = link {
            actions.push(json!({"type": "Action.OpenUrl", "title": "Open task", "url": link}));
        }
        actions.push(json!({
            "type": "Action.Submit",
            "title": "Finalize",
            "data": {"action": "finalizar", "taskId": task.id}
        }));
        actions.push(json!({
            "type": "Action.Submit",
            "title": "Dismiss",
            "data": {"action": "dispensar", "taskId": task.id}
        }));

        json!({
            "type": "AdaptiveCard",
            "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
            "version": "1.3",
            "body": [
                {
                    "type": "TextBlock",
                    "text": urgency_line(task, bucket),
                    "color": urgency_color(bucket),
                    "weight": "Bolder",
                    "wrap": true
                },
                {
                    "type": "TextBlock",
                    "text": task.title,
                    "size": "Large",
                    "weight": "Bolder",
                    "wrap": true
                },
                {
                    "type": "FactSet",
                    "facts": [
                        {"title": "ID:", "value": task.id},
                        {"title": "Due:", "value": due},
                        {"title": "Status:", "value": task.status.label()},
                        {"title": "Responsible:", "value": responsible}
                    ]
                }
            ],
            "actions": actions
        })
    }
}

impl Renderer for CardRenderer {
    fn render(&self, task: &Task, responsible: &str, bucket: TemporalBucket) -> RenderedContent {
        let link = self.task_link(&task.id);
        let mut text = format!(
            "[{bucket}] {} (ID {}) - {}\nResponsible: {responsible}",
            task.title,
            task.id,
            urgency_line(task, bucket)
        );
        if let Some(link) = link.as_deref() {
            text.push_str("\nOpen: ");
            text.push_str(link);
        }
        RenderedContent {
            card: Some(self.card(task, responsible, bucket, link.as_deref())),
            text,
        }
    }
}
