//! Responsibles without a bot conversation, or whose conversation fails,
//! are reached through the webhook instead.

use crate::helpers::{
    at, bot_activities, live_request, mount_bot, mount_tasks, orchestrator, task_json, test_env,
    webhook_posts, ymd,
};
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

fn texts(posts: &[serde_json::Value]) -> Vec<String> {
    let mut texts: Vec<String> = posts
        .iter()
        .map(|p| p["text"].as_str().unwrap_or_default().to_owned())
        .collect();
    texts.sort();
    texts
}

#[tokio::test]
async fn responsible_without_session_gets_webhook() {
    let env = test_env(&["ana"]).await;
    mount_tasks(
        &env.server,
        vec![
            task_json("301", "DCTF", "2025-06-10", &["ana", "bia"]),
            task_json("302", "GIA", "2025-06-10", &[]),
        ],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/tarefas/302/responsaveis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 9, "apelido": "bia"}])))
        .expect(1)
        .mount(&env.server)
        .await;
    mount_bot(&env.server).await;
    let orchestrator = orchestrator(&env);

    let report = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), at(ymd(2025, 6, 10)))
        .await;
    assert_eq!(report.counters.dispatched_stateful, 1);
    assert_eq!(report.counters.dispatched_stateless, 2);
    assert_eq!(report.counters.stateless_fallbacks, 0);
    assert_eq!(report.counters.responsibles_notified, 2);

    let activities = bot_activities(&env.server).await;
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0]["conversation"]["id"], "conv-ana");

    let posted = texts(&webhook_posts(&env.server).await);
    assert_eq!(posted.len(), 2);
    assert!(posted[0].contains("(ID 301)"), "{posted:?}");
    assert!(posted[1].contains("(ID 302)"), "{posted:?}");
    assert!(posted.iter().all(|t| t.contains("Responsible: bia")));
}

#[tokio::test]
async fn failing_conversation_falls_back_once() {
    let env = test_env(&["ana"]).await;
    mount_tasks(
        &env.server,
        vec![task_json("303", "ECF", "2025-06-11", &["ana"])],
    )
    .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/teams/v3/conversations/[^/]+/activities$"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&env.server)
        .await;
    let orchestrator = orchestrator(&env);
    let now = at(ymd(2025, 6, 10));

    let first = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), now)
        .await;
    assert_eq!(first.counters.dispatched_stateful, 0);
    assert_eq!(first.counters.dispatched_stateless, 1);
    assert_eq!(first.counters.stateless_fallbacks, 1);
    assert_eq!(first.counters.failed, 0);
    assert_eq!(webhook_posts(&env.server).await.len(), 1);

    let second = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), now)
        .await;
    assert_eq!(second.counters.deduplicated, 1);
    assert_eq!(webhook_posts(&env.server).await.len(), 1);
}

#[tokio::test]
async fn test_recipient_receives_every_bot_message() {
    let mut env = test_env(&["tester"]).await;
    env.config.bot.test_recipient = Some("tester".into());
    mount_tasks(
        &env.server,
        vec![task_json("304", "DIRF", "2025-06-10", &["carlos"])],
    )
    .await;
    mount_bot(&env.server).await;
    let orchestrator = orchestrator(&env);

    let report = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), at(ymd(2025, 6, 10)))
        .await;
    assert_eq!(report.counters.dispatched_stateful, 1);
    let activities = bot_activities(&env.server).await;
    assert_eq!(activities[0]["conversation"]["id"], "conv-tester");
    assert!(webhook_posts(&env.server).await.is_empty());
}
