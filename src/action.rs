//! Canonical action extraction from inbound event payloads.
//!
//! Card submissions reach the gateway in several shapes depending on the
//! client, card version and whether the event came through the bot channel
//! or a direct HTTP caller. Each shape is handled by one strategy; strategies
//! are tried in a fixed priority order and the first that yields both an
//! action label and a task id wins.
//!
//! | priority | shape | where the fields live |
//! |---|---|---|
//! | 1 | inline value | `value.{action,taskId}` |
//! | 2 | nested invoke | `value.action.{verb,data.taskId}` |
//! | 3 | value.data | `value.data.{action,taskId}` |
//! | 4 | postback | `channelData.postBack.{..}` / `channelData.postback.data.{..}` |
//! | 5 | flat | `{action,taskId}` at the top level |
//!
//! Legacy field names are accepted everywhere: `verb` for the label and
//! `task_id` / `id` for the task id.

use serde::Serialize;
use serde_json::Value;

const LABEL_FIELDS: [&str; 2] = ["action", "verb"];
const TASK_ID_FIELDS: [&str; 3] = ["taskId", "task_id", "id"];

/// The action a user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum ActionKind {
    Finalize,
    Dismiss,
    /// Recognised shape, unrecognised label.
    Unknown(String),
}

impl ActionKind {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "finalize" | "finalizar" | "complete" | "done" => Self::Finalize,
            "dismiss" | "dispensar" => Self::Dismiss,
            _ => Self::Unknown(label.trim().to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Finalize => "finalize",
            Self::Dismiss => "dismiss",
            Self::Unknown(label) => label,
        }
    }
}

/// Canonical inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRequest {
    pub action: ActionKind,
    pub task_id: String,
}

/// Result of running the normalizer over a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Action(ActionRequest),
    /// No strategy found both an action label and a task id.
    Unextractable,
}

/// Outcome of a single strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShapeMatch {
    Matched { label: String, task_id: String },
    NoMatch,
}

type Strategy = (&'static str, fn(&Value) -> ShapeMatch);

const STRATEGIES: [Strategy; 5] = [
    ("inline_value", inline_value),
    ("nested_invoke", nested_invoke),
    ("value_data", value_data),
    ("postback", postback),
    ("flat", flat),
];

/// Extract a canonical [`ActionRequest`] from any supported payload shape.
pub fn extract(payload: &Value) -> Extraction {
    for (name, strategy) in STRATEGIES {
        if let ShapeMatch::Matched { label, task_id } = strategy(payload) {
            tracing::debug!(shape = name, task_id = %task_id, "action extracted");
            return Extraction::Action(ActionRequest {
                action: ActionKind::from_label(&label),
                task_id,
            });
        }
    }
    Extraction::Unextractable
}

/// Read a non-blank string field; numbers are stringified.
fn field_text(obj: &Value, name: &str) -> Option<String> {
    match obj.get(name)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_field(obj: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| field_text(obj, name))
}

/// Match `{action|verb, taskId|task_id|id}` on a single object.
fn match_object(obj: &Value) -> ShapeMatch {
    if !obj.is_object() {
        return ShapeMatch::NoMatch;
    }
    match (first_field(obj, &LABEL_FIELDS), first_field(obj, &TASK_ID_FIELDS)) {
        (Some(label), Some(task_id)) => ShapeMatch::Matched { label, task_id },
        _ => ShapeMatch::NoMatch,
    }
}

fn inline_value(payload: &Value) -> ShapeMatch {
    payload.get("value").map_or(ShapeMatch::NoMatch, match_object)
}

/// Universal-action invoke: `value.action` is an object with a `verb` and
/// a `data` object carrying the task id (and sometimes the label).
fn nested_invoke(payload: &Value) -> ShapeMatch {
    let Some(action) = payload.get("value").and_then(|v| v.get("action")) else {
        return ShapeMatch::NoMatch;
    };
    if !action.is_object() {
        return ShapeMatch::NoMatch;
    }
    let data = action.get("data").unwrap_or(&Value::Null);
    let label = first_field(action, &["verb", "action"]).or_else(|| first_field(data, &LABEL_FIELDS));
    let task_id = first_field(data, &TASK_ID_FIELDS);
    match (label, task_id) {
        (Some(label), Some(task_id)) => ShapeMatch::Matched { label, task_id },
        _ => ShapeMatch::NoMatch,
    }
}

fn value_data(payload: &Value) -> ShapeMatch {
    payload
        .get("value")
        .and_then(|v| v.get("data"))
        .map_or(ShapeMatch::NoMatch, match_object)
}

fn postback(payload: &Value) -> ShapeMatch {
    let Some(channel_data) = payload.get("channelData") else {
        return ShapeMatch::NoMatch;
    };
    if let Some(direct) = channel_data.get("postBack") {
        if let m @ ShapeMatch::Matched { .. } = match_object(direct) {
            return m;
        }
    }
    channel_data
        .get("postback")
        .and_then(|p| p.get("data"))
        .map_or(ShapeMatch::NoMatch, match_object)
}

fn flat(payload: &Value) -> ShapeMatch {
    match_object(payload)
}
