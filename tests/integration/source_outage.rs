//! Task source failures end the cycle early but still produce metrics.

use crate::helpers::{TestEnv, at, live_request, orchestrator, test_env, webhook_posts, ymd};
use duewatch::cycle::{CycleOutcome, CycleReport};
use duewatch::error::FailureClass;
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn metrics_lines(env: &TestEnv) -> Vec<Value> {
    let path = env.dir.path().join("metrics/notification_cycle_2025-06.jsonl");
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn failure_class(report: &CycleReport) -> FailureClass {
    match &report.outcome {
        CycleOutcome::PartialFailure { class, .. } => *class,
        CycleOutcome::Completed => panic!("expected a partial failure"),
    }
}

#[tokio::test]
async fn unavailable_source_yields_partial_failure() {
    let env = test_env(&[]).await;
    Mock::given(method("GET"))
        .and(path("/tarefas"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&env.server)
        .await;
    let orchestrator = orchestrator(&env);

    let report = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), at(ymd(2025, 6, 10)))
        .await;
    assert_eq!(failure_class(&report), FailureClass::Transient);
    assert!(webhook_posts(&env.server).await.is_empty());
    assert!(!env.dir.path().join("reports/too_late_2025-06-10.csv").exists());

    let lines = metrics_lines(&env);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["outcome"]["status"], "partial_failure");
    assert_eq!(lines[0]["outcome"]["class"], "transient");
    assert_eq!(lines[0]["run_id"], report.run_id.as_str());
}

#[tokio::test]
async fn garbled_listing_is_malformed_input() {
    let env = test_env(&[]).await;
    Mock::given(method("GET"))
        .and(path("/tarefas"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&env.server)
        .await;
    let orchestrator = orchestrator(&env);

    let report = orchestrator
        .run_cycle_at(live_request(&orchestrator, "morning"), at(ymd(2025, 6, 10)))
        .await;
    assert_eq!(failure_class(&report), FailureClass::MalformedInput);
}

#[tokio::test]
async fn repeated_outage_opens_the_breaker() {
    let env = test_env(&[]).await;
    let threshold = env.config.resilience.policy_for("task_source").failure_threshold;
    Mock::given(method("GET"))
        .and(path("/tarefas"))
        .respond_with(ResponseTemplate::new(500))
        .expect(u64::from(threshold))
        .mount(&env.server)
        .await;
    let orchestrator = orchestrator(&env);
    let now = at(ymd(2025, 6, 10));

    for _ in 0..threshold {
        let report = orchestrator.run_cycle_at(live_request(&orchestrator, "morning"), now).await;
        assert_eq!(failure_class(&report), FailureClass::Transient);
    }
    let short_circuited = orchestrator.run_cycle_at(live_request(&orchestrator, "morning"), now).await;
    assert_eq!(failure_class(&short_circuited), FailureClass::Exhausted);

    let health = serde_json::to_value(orchestrator.health()).unwrap();
    let source = health["dependencies"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["name"] == "task_source")
        .unwrap()
        .clone();
    assert_eq!(source["state"], "open");
    assert_eq!(metrics_lines(&env).len(), usize::try_from(threshold).unwrap() + 1);
}
