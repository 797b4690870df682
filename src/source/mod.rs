//! Task source contract and the bundled HTTP implementation.

pub mod http;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::FailureClass;
use crate::task::{Task, TaskStatus};

pub use http::HttpTaskSource;

/// Due-date window and paging parameters for one collection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub page_size: u32,
    pub category: String,
}

impl FetchWindow {
    /// `[today - lookback, today + horizon]`, saturating at the calendar
    /// limits instead of overflowing.
    pub fn around(
        today: NaiveDate,
        lookback_days: u32,
        horizon_days: u32,
        page_size: u32,
        category: &str,
    ) -> Self {
        Self {
            start: today
                .checked_sub_signed(Duration::days(i64::from(lookback_days)))
                .unwrap_or(NaiveDate::MIN),
            end: today
                .checked_add_signed(Duration::days(i64::from(horizon_days)))
                .unwrap_or(NaiveDate::MAX),
            page_size,
            category: category.to_owned(),
        }
    }
}

/// One page of tasks. `next_page` is `None` on the last page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Timeouts, connection failures, 5xx, 429.
    #[error("task source unavailable: {0}")]
    Transient(String),

    /// Credentials refused even after a token refresh.
    #[error("task source authentication failed: {0}")]
    Auth(String),

    /// The source answered with something we cannot interpret.
    #[error("malformed task source response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transient(_) | Self::Auth(_) => FailureClass::Transient,
            Self::Malformed(_) => FailureClass::MalformedInput,
        }
    }
}

/// Where pending obligations come from.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch one page of tasks due inside `window`. `page_token` is `None`
    /// for the first page and the previous page's `next_page` afterwards.
    async fn fetch_page(
        &self,
        window: &FetchWindow,
        page_token: Option<&str>,
    ) -> Result<TaskPage, SourceError>;

    /// Move a task to a new status upstream.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), SourceError>;
}
