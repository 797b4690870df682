//! Card actions through the gateway: every supported payload shape lands on
//! the same request, updates the source and silences the task.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use duewatch::action::{self, ActionKind, ActionRequest, Extraction};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::helpers::{at, live_request, mount_bot, mount_tasks, orchestrator, task_json, test_env, webhook_posts, ymd};

async fn post(app: axum::Router, payload: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/messages")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer gw-token")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn every_shape_yields_the_same_request() {
    let expected = Extraction::Action(ActionRequest {
        action: ActionKind::Dismiss,
        task_id: "401.3".into(),
    });
    let shapes = [
        json!({"type": "message", "value": {"action": "dispensar", "taskId": "401.3"}}),
        json!({"type": "invoke", "value": {"action": {"verb": "dispensar", "data": {"taskId": "401.3"}}}}),
        json!({"value": {"data": {"action": "dispensar", "taskId": "401.3"}}}),
        json!({"channelData": {"postBack": {"action": "dispensar", "taskId": "401.3"}}}),
        json!({"action": "dispensar", "task_id": "401.3"}),
    ];
    for shape in &shapes {
        assert_eq!(action::extract(shape), expected, "{shape}");
    }
    assert_eq!(action::extract(&json!({})), Extraction::Unextractable);
}

#[tokio::test]
async fn dismiss_from_card_updates_source_and_stops_reminders() {
    let mut env = test_env(&[]).await;
    env.config.gateway.bearer_token = Some("gw-token".into());
    mount_tasks(
        &env.server,
        vec![
            task_json("401.3", "DCTF", "2025-06-10", &["ana"]),
            task_json("402", "GIA", "2025-06-10", &["ana"]),
        ],
    )
    .await;
    mount_bot(&env.server).await;
    Mock::given(method("PUT"))
        .and(path("/tarefas/401.3/status"))
        .and(body_json(json!({"status": "D"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&env.server)
        .await;

    let orchestrator = Arc::new(orchestrator(&env));
    let app = duewatch::channels::router(Arc::clone(&orchestrator), env.config.gateway.bearer_token.clone());

    let card_submit = json!({
        "type": "message",
        "from": {"id": "29:ana"},
        "value": {"action": "dispensar", "taskId": "401.3"}
    });
    let (status, ack) = post(app.clone(), &card_submit).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "applied", "{ack}");
    assert_eq!(ack["task_id"], "401.3");

    let report = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), at(ymd(2025, 6, 10)))
        .await;
    assert_eq!(report.counters.acknowledged, 1);
    assert_eq!(report.counters.dispatched(), 1);
    let posted = webhook_posts(&env.server).await;
    assert_eq!(posted.len(), 1);
    assert!(posted[0]["text"].as_str().unwrap().contains("(ID 402)"));

    // Finalize is local by default: no upstream call, still acknowledged.
    let finalize = json!({"value": {"action": {"verb": "finalizar", "data": {"taskId": "402"}}}});
    let (status, ack) = post(app, &finalize).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "applied");
    assert_eq!(ack["action"], "finalize");
    assert!(orchestrator.store().is_acknowledged("402").unwrap());
}

#[tokio::test]
async fn upstream_rejection_is_reported_in_the_ack() {
    let mut env = test_env(&[]).await;
    env.config.gateway.bearer_token = Some("gw-token".into());
    Mock::given(method("PUT"))
        .and(path("/tarefas/403/status"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid transition"))
        .mount(&env.server)
        .await;
    let orchestrator = Arc::new(orchestrator(&env));
    let app = duewatch::channels::router(Arc::clone(&orchestrator), Some("gw-token".into()));

    let (status, ack) = post(app, &json!({"action": "dispensar", "taskId": "403"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "failed");
    assert!(ack["detail"].as_str().unwrap().contains("invalid transition"), "{ack}");
    assert!(!orchestrator.store().is_acknowledged("403").unwrap());
}
