//! REST task source.
//!
//! Endpoints, relative to `source.base_url`:
//!
//! - `GET /tarefas?categoria&page&size&dataVencimentoInicio&dataVencimentoFim`
//!   returns `{content: [...], last: bool}`; the page token is the next page
//!   number.
//! - `GET /tarefas/{id}/responsaveis` for tasks listed without responsibles.
//!   Results go through the responsible-lookup cache.
//! - `PUT /tarefas/{id}/status` with `{"status": "<code>"}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duewatch_guard::{CacheKey, TtlCache};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::{FetchWindow, SourceError, TaskPage, TaskSource};
use crate::auth::{ClientCredentials, TokenCache, TokenError, truncate};
use crate::config::SourceConfig;
use crate::error::{NotifyError, Result};
use crate::task::{Task, TaskStatus, parse_due_date};

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    content: Vec<RawTask>,
    #[serde(default)]
    last: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    nome: Option<String>,
    #[serde(default)]
    titulo: Option<String>,
    #[serde(default, rename = "dataVencimento")]
    data_vencimento: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    responsaveis: Vec<RawResponsible>,
}

#[derive(Debug, Deserialize)]
struct RawResponsible {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    apelido: Option<String>,
    #[serde(default)]
    nome: Option<String>,
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(text: Option<&String>) -> Option<String> {
    text.map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_owned)
}

impl RawResponsible {
    /// Nickname first, then display name, then a synthetic id-based key.
    fn key(&self) -> Option<String> {
        non_blank(self.apelido.as_ref())
            .or_else(|| non_blank(self.nome.as_ref()))
            .or_else(|| value_text(&self.id).map(|id| format!("resp_{id}")))
    }
}

impl RawTask {
    fn into_task(self) -> Option<Task> {
        let id = value_text(&self.id)?;
        let title = non_blank(self.nome.as_ref())
            .or_else(|| non_blank(self.titulo.as_ref()))
            .unwrap_or_else(|| format!("Task {id}"));
        let due_date = self.data_vencimento.as_deref().and_then(parse_due_date);
        // Listings are already filtered by open status upstream.
        let status = self
            .status
            .as_deref()
            .map_or(TaskStatus::Open, TaskStatus::from_code);
        let responsibles = self.responsaveis.iter().filter_map(RawResponsible::key).collect();
        Some(Task {
            id,
            title,
            due_date,
            status,
            responsibles,
        })
    }
}

fn token_error(err: TokenError) -> SourceError {
    match err {
        TokenError::Unavailable(msg) => SourceError::Transient(msg),
        TokenError::Rejected { .. } => SourceError::Auth(err.to_string()),
        TokenError::Malformed(msg) => SourceError::Malformed(msg),
    }
}

/// HTTP client for the upstream task API.
pub struct HttpTaskSource {
    base_url: String,
    client: reqwest::Client,
    token: TokenCache,
    responsibles: Arc<TtlCache<Vec<String>>>,
}

impl HttpTaskSource {
    /// `responsibles` is the responsible-lookup cache; it is shared so its
    /// stats can be reported by the health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &SourceConfig, responsibles: Arc<TtlCache<Vec<String>>>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("duewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build task source client: {e}")))?;
        let token = TokenCache::new(
            ClientCredentials {
                token_url: config.resolved_token_url(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                scope: None,
            },
            client.clone(),
        );
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client,
            token,
            responsibles,
        })
    }

    pub fn responsible_cache(&self) -> &TtlCache<Vec<String>> {
        &self.responsibles
    }

    /// Send an authenticated request, refreshing the token once on 401/403.
    async fn send_authorized<F>(&self, build: F) -> std::result::Result<reqwest::Response, SourceError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut refreshed = false;
        loop {
            let token = self.token.bearer().await.map_err(token_error)?;
            let response = build(&token)
                .send()
                .await
                .map_err(|e| SourceError::Transient(e.to_string()))?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                if refreshed {
                    return Err(SourceError::Auth(format!("status {status} after token refresh")));
                }
                tracing::info!(%status, "task source refused token; refreshing");
                self.token.invalidate();
                refreshed = true;
                continue;
            }
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(SourceError::Transient(format!("status {status}")));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceError::Malformed(format!(
                    "status {status}: {}",
                    truncate(&body, 300)
                )));
            }
            return Ok(response);
        }
    }

    /// Responsibles for a task, via the lookup cache. Lookup failures yield
    /// an empty list and are not cached.
    async fn responsibles_for(&self, task_id: &str) -> Vec<String> {
        let key = CacheKey::structured("responsibles", &[("task", task_id)]);
        if let Some(hit) = self.responsibles.get(&key) {
            return hit;
        }

        let url = format!("{}/tarefas/{task_id}/responsaveis", self.base_url);
        let response = match self
            .send_authorized(|token| self.client.get(&url).bearer_auth(token))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(task_id, error = %err, "responsible lookup failed");
                return Vec::new();
            }
        };
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(task_id, error = %err, "responsible lookup returned invalid JSON");
                return Vec::new();
            }
        };
        let resolved: Vec<String> = match serde_json::from_value::<Vec<RawResponsible>>(body) {
            Ok(list) => list.iter().filter_map(RawResponsible::key).collect(),
            Err(_) => {
                tracing::warn!(task_id, "responsible lookup did not return a list");
                Vec::new()
            }
        };
        self.responsibles.insert(&key, resolved.clone());
        resolved
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn fetch_page(
        &self,
        window: &FetchWindow,
        page_token: Option<&str>,
    ) -> std::result::Result<TaskPage, SourceError> {
        let page: u32 = match page_token {
            None => 0,
            Some(token) => token
                .trim()
                .parse()
                .map_err(|_| SourceError::Malformed(format!("invalid page token {token:?}")))?,
        };

        let url = format!("{}/tarefas", self.base_url);
        let params = [
            ("categoria", window.category.clone()),
            ("page", page.to_string()),
            ("size", window.page_size.to_string()),
            ("dataVencimentoInicio", window.start.format("%Y-%m-%d").to_string()),
            ("dataVencimentoFim", window.end.format("%Y-%m-%d").to_string()),
        ];
        let response = self
            .send_authorized(|token| self.client.get(&url).bearer_auth(token).query(&params))
            .await?;
        let raw: RawPage = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        let listed = raw.content.len();
        let mut tasks = Vec::with_capacity(listed);
        for item in raw.content {
            match item.into_task() {
                Some(task) => tasks.push(task),
                None => tracing::warn!(page, "skipping task without id"),
            }
        }
        for task in tasks.iter_mut().filter(|t| t.responsibles.is_empty()) {
            task.responsibles = self.responsibles_for(&task.id).await;
        }

        let is_last = listed == 0
            || raw
                .last
                .unwrap_or(listed < usize::try_from(window.page_size).unwrap_or(usize::MAX));
        tracing::debug!(page, listed, is_last, "fetched task page");
        Ok(TaskPage {
            tasks,
            next_page: (!is_last).then(|| (page + 1).to_string()),
        })
    }

    async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> std::result::Result<(), SourceError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(SourceError::Malformed("empty task id".into()));
        }
        let url = format!("{}/tarefas/{task_id}/status", self.base_url);
        let body = serde_json::json!({ "status": status.code() });
        self.send_authorized(|token| self.client.put(&url).bearer_auth(token).json(&body))
            .await?;
        tracing::info!(task_id, status = status.code(), "task status updated upstream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .mount(server)
            .await;
    }

    fn source_for(server: &MockServer) -> HttpTaskSource {
        let config = SourceConfig {
            base_url: server.uri(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            ..SourceConfig::default()
        };
        HttpTaskSource::new(&config, lookup_cache()).unwrap()
    }

    fn lookup_cache() -> Arc<TtlCache<Vec<String>>> {
        Arc::new(TtlCache::new("responsibles", 10, Duration::from_secs(600)))
    }

    fn window(page_size: u32) -> FetchWindow {
        let today = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        FetchWindow::around(today, 1, 3, page_size, "Obrigacao")
    }

    #[tokio::test]
    async fn fetches_page_with_window_params() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/tarefas"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("categoria", "Obrigacao"))
            .and(query_param("page", "0"))
            .and(query_param("size", "2"))
            .and(query_param("dataVencimentoInicio", "2025-06-09"))
            .and(query_param("dataVencimentoFim", "2025-06-13"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"id": "10.1", "nome": "DCTF", "dataVencimento": "2025-06-10", "status": "A",
                     "responsaveis": [{"id": 1, "apelido": "ana"}]},
                    {"id": 11, "titulo": "GIA", "dataVencimento": "not a date", "status": "S",
                     "responsaveis": [{"id": 2, "nome": "Bruno"}, {"id": 3}]}
                ],
                "last": false
            })))
            .mount(&server)
            .await;

        let page = source_for(&server).fetch_page(&window(2), None).await.unwrap();
        assert_eq!(page.next_page.as_deref(), Some("1"));
        assert_eq!(page.tasks.len(), 2);
        assert_eq!(page.tasks[0].id, "10.1");
        assert_eq!(page.tasks[0].due_date, NaiveDate::from_ymd_opt(2025, 6, 10));
        assert_eq!(page.tasks[0].responsibles, vec!["ana".to_string()]);
        assert_eq!(page.tasks[1].id, "11");
        assert_eq!(page.tasks[1].title, "GIA");
        assert_eq!(page.tasks[1].due_date, None);
        assert_eq!(page.tasks[1].status, TaskStatus::Waiting);
        assert_eq!(
            page.tasks[1].responsibles,
            vec!["Bruno".to_string(), "resp_3".to_string()]
        );
    }

    #[tokio::test]
    async fn last_flag_and_short_page_end_paging() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/tarefas"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"id": "1", "responsaveis": [{"apelido": "ana"}]}],
                "last": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tarefas"))
            .and(query_param("page", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"id": "2", "responsaveis": [{"apelido": "ana"}]}]
            })))
            .mount(&server)
            .await;

        let source = source_for(&server);
        let page = source.fetch_page(&window(50), Some("3")).await.unwrap();
        assert_eq!(page.next_page, None);
        // No `last` flag, fewer items than the page size.
        let page = source.fetch_page(&window(50), Some("4")).await.unwrap();
        assert_eq!(page.next_page, None);
    }

    #[tokio::test]
    async fn missing_responsibles_are_looked_up_once() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/tarefas"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"id": "77", "nome": "ECF", "dataVencimento": "2025-06-11"}],
                "last": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tarefas/77/responsaveis"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": 5, "apelido": "carla"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server);
        for _ in 0..2 {
            let page = source.fetch_page(&window(50), None).await.unwrap();
            assert_eq!(page.tasks[0].responsibles, vec!["carla".to_string()]);
        }
        assert_eq!(source.responsible_cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn refreshes_token_once_on_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tarefas"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tarefas"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": [], "last": true})))
            .mount(&server)
            .await;

        let page = source_for(&server).fetch_page(&window(50), None).await.unwrap();
        assert!(page.tasks.is_empty());
    }

    #[tokio::test]
    async fn error_statuses_map_to_source_errors() {
        let cases = [
            (ResponseTemplate::new(401), "auth"),
            (ResponseTemplate::new(503), "transient"),
            (ResponseTemplate::new(429), "transient"),
            (ResponseTemplate::new(400).set_body_string("bad filter"), "malformed"),
            (ResponseTemplate::new(200).set_body_string("<html>"), "malformed"),
        ];
        for (template, expected) in cases {
            let server = MockServer::start().await;
            mount_token(&server).await;
            Mock::given(method("GET"))
                .and(path("/tarefas"))
                .respond_with(template)
                .mount(&server)
                .await;
            let err = source_for(&server).fetch_page(&window(50), None).await.unwrap_err();
            let kind = match err {
                SourceError::Auth(_) => "auth",
                SourceError::Transient(_) => "transient",
                SourceError::Malformed(_) => "malformed",
            };
            assert_eq!(kind, expected, "{err}");
        }
    }

    #[tokio::test]
    async fn invalid_page_token_is_malformed() {
        let server = MockServer::start().await;
        let err = source_for(&server)
            .fetch_page(&window(50), Some("next"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[tokio::test]
    async fn update_status_puts_status_code() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("PUT"))
            .and(path("/tarefas/10.1/status"))
            .and(body_json(json!({"status": "D"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        source_for(&server)
            .update_status("10.1", TaskStatus::Dismissed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_source_is_transient() {
        let config = SourceConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..SourceConfig::default()
        };
        let source = HttpTaskSource::new(&config, lookup_cache()).unwrap();
        let err = source.fetch_page(&window(50), None).await.unwrap_err();
        assert!(matches!(err, SourceError::Transient(_)), "{err}");
    }
}
