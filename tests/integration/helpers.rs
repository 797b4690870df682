//! Shared helpers for integration tests.
//!
//! One wiremock server plays every remote party: the task API under `/`,
//! the bot token endpoint and conversations under `/bot` and `/teams`, and the
//! webhook under `/hook`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use duewatch::config::DuewatchConfig;
use duewatch::{CycleOrchestrator, ExecutionMode};
use serde_json::{Value, json};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) const WEBHOOK_PATH: &str = "/hook";

pub(crate) struct TestEnv {
    pub server: MockServer,
    pub dir: tempfile::TempDir,
    pub config: DuewatchConfig,
}

pub(crate) fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Noon UTC, i.e. 09:00 on the same day at the default -03:00 offset.
pub(crate) fn at(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(12, 0, 0).expect("valid time"))
}

/// Start the mock server, mount both token endpoints and write a session
/// file containing `sessions` (responsible ids with a bot conversation).
pub(crate) async fn test_env(sessions: &[&str]) -> TestEnv {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("create temp dir");

    for token_path in ["/oauth/token", "/bot/token"] {
        Mock::given(method("POST"))
            .and(path(token_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "tok", "expires_in": 3600})),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let references: serde_json::Map<String, Value> = sessions
        .iter()
        .map(|id| {
            (
                (*id).to_owned(),
                json!({
                    "serviceUrl": format!("{}/teams/", server.uri()),
                    "conversation": {"id": format!("conv-{id}")},
                    "user": {"id": format!("29:{id}")},
                    "channelId": "msteams"
                }),
            )
        })
        .collect();
    let sessions_path = dir.path().join("conversation_references.json");
    std::fs::write(&sessions_path, Value::Object(references).to_string()).expect("write sessions");

    let mut config = DuewatchConfig::default();
    config.cycle.dry_run = false;
    config.source.base_url = server.uri();
    config.source.client_id = "client".into();
    config.source.client_secret = "secret".into();
    config.source.app_url = "https://app.example.com".into();
    config.bot.enabled = true;
    config.bot.app_id = "app-1".into();
    config.bot.app_password = "pw".into();
    config.bot.token_url = format!("{}/bot/token", server.uri());
    config.bot.sessions_path = Some(sessions_path);
    config.webhook.url = Some(format!("{}{WEBHOOK_PATH}", server.uri()));
    config.idempotency.db_path = Some(dir.path().join("idempotency.db"));
    config.output.report_dir = Some(dir.path().join("reports"));
    config.output.metrics_dir = Some(dir.path().join("metrics"));

    TestEnv {
        server,
        dir,
        config,
    }
}

/// Upstream task JSON in the shape the task API returns.
pub(crate) fn task_json(id: &str, title: &str, due: &str, responsibles: &[&str]) -> Value {
    let responsaveis: Vec<Value> = responsibles
        .iter()
        .enumerate()
        .map(|(i, nick)| json!({"id": i + 1, "apelido": nick}))
        .collect();
    json!({
        "id": id,
        "nome": title,
        "dataVencimento": due,
        "status": "A",
        "responsaveis": responsaveis
    })
}

/// Serve `tasks` as a single last page of `GET /tarefas`.
pub(crate) async fn mount_tasks(server: &MockServer, tasks: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/tarefas"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": tasks,
            "last": true
        })))
        .mount(server)
        .await;
}

/// Accept every bot activity.
pub(crate) async fn mount_bot(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path_regex(r"^/teams/v3/conversations/[^/]+/activities$"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "activity-1"})))
        .mount(server)
        .await;
}

/// Bodies of requests the server received on paths matching `predicate`.
pub(crate) async fn bodies(server: &MockServer, predicate: impl Fn(&str) -> bool) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| predicate(r.url.path()))
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

pub(crate) async fn bot_activities(server: &MockServer) -> Vec<Value> {
    bodies(server, |p| p.starts_with("/teams/")).await
}

pub(crate) async fn webhook_posts(server: &MockServer) -> Vec<Value> {
    bodies(server, |p| p == WEBHOOK_PATH).await
}

pub(crate) fn orchestrator(env: &TestEnv) -> CycleOrchestrator {
    duewatch::startup::build_orchestrator(&env.config).expect("build orchestrator")
}

pub(crate) fn live_request(
    orchestrator: &CycleOrchestrator,
    profile: &str,
) -> duewatch::CycleRequest {
    orchestrator.request(Some(profile), None, profile, ExecutionMode::Live)
}
