//! duewatch: due-date notification cycles over a task management API.
//!
//! A cycle collects open tasks, classifies them against "today", filters out
//! what was already sent or acknowledged, and delivers one message per
//! (task, responsible) pair:
//!
//! TaskSource → Classifier → Idempotency filter → Renderer → Transport → Store
//!
//! # Architecture
//!
//! - **Classifier** ([`classify`]): pure calendar arithmetic in a fixed offset
//! - **Idempotency store** ([`idempotency`]): SQLite, keyed by day, responsible
//!   and task id; also remembers inbound acknowledgments
//! - **Guards** (`duewatch-guard`): one circuit breaker and token bucket per
//!   dependency plus the TTL/LRU cache
//! - **Orchestrator** ([`cycle`]): stage machine for one cycle and inbound
//!   action handling
//! - **Collaborators**: HTTP task source ([`source`]), bot and webhook
//!   transports ([`channels`]), card renderer ([`render`]), CSV report
//!   ([`report`]) and JSONL metrics ([`metrics`])
//! - **Gateway** ([`channels::gateway`]): axum endpoint for card actions

pub mod action;
pub mod auth;
pub mod channels;
pub mod classify;
pub mod config;
pub mod cycle;
pub mod error;
pub mod idempotency;
pub mod metrics;
pub mod paths;
pub mod render;
pub mod report;
pub mod source;
pub mod startup;
pub mod task;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::DuewatchConfig;
pub use cycle::{CycleOrchestrator, CycleReport, CycleRequest, ExecutionMode};
pub use error::{NotifyError, Result};
pub use task::{Task, TaskStatus};
