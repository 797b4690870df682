//! Five consecutive days, two cycles a day, one task walking through every
//! bucket. Each pair is delivered at most once per day.

use crate::helpers::{at, bot_activities, live_request, mount_bot, mount_tasks, orchestrator, task_json, test_env, ymd};
use duewatch::classify::TemporalBucket;
use duewatch::cycle::CycleOutcome;

#[tokio::test]
async fn task_walks_buckets_over_five_days() {
    let env = test_env(&["ana"]).await;
    mount_tasks(
        &env.server,
        vec![task_json("101.7", "DCTF Mensal", "2025-06-12", &["ana"])],
    )
    .await;
    mount_bot(&env.server).await;
    let orchestrator = orchestrator(&env);

    // (day, morning bucket, sends expected that day)
    let walk = [
        (ymd(2025, 6, 10), TemporalBucket::DueSoon, 1),
        (ymd(2025, 6, 11), TemporalBucket::DueSoon, 1),
        (ymd(2025, 6, 12), TemporalBucket::DueToday, 1),
        (ymd(2025, 6, 13), TemporalBucket::Overdue, 1),
        (ymd(2025, 6, 14), TemporalBucket::TooLate, 0),
    ];

    let mut expected_total = 0;
    for (day, bucket, sends) in walk {
        let morning = orchestrator
            .run_cycle_at(live_request(&orchestrator, "morning"), at(day))
            .await;
        assert_eq!(morning.outcome, CycleOutcome::Completed, "{day}");
        assert_eq!(morning.counters.bucket(bucket), 1, "{day}: {:?}", morning.counters.buckets);
        assert_eq!(morning.counters.dispatched_stateful, sends, "{day}");

        let afternoon = orchestrator
            .run_cycle_at(
                live_request(&orchestrator, "afternoon"),
                at(day) + chrono::Duration::hours(6),
            )
            .await;
        assert_eq!(afternoon.horizon_days, 1);
        assert_eq!(afternoon.counters.dispatched(), 0, "{day}: second run must not resend");

        expected_total += sends;
        assert_eq!(bot_activities(&env.server).await.len(), expected_total);
    }

    let activities = bot_activities(&env.server).await;
    assert!(activities.iter().all(|a| a["recipient"]["id"] == "29:ana"));
    assert!(activities.iter().all(|a| a["attachments"][0]["content"]["type"] == "AdaptiveCard"));

    let report = std::fs::read_to_string(env.dir.path().join("reports/too_late_2025-06-14.csv")).unwrap();
    assert!(report.contains("101.7,DCTF Mensal,2025-06-12,2,A,ana"), "{report}");

    let metrics = std::fs::read_to_string(env.dir.path().join("metrics/notification_cycle_2025-06.jsonl")).unwrap();
    assert_eq!(metrics.lines().count(), 10);
}

#[tokio::test]
async fn afternoon_horizon_ignores_tasks_due_later() {
    let env = test_env(&["ana"]).await;
    mount_tasks(
        &env.server,
        vec![task_json("202", "ISS", "2025-06-12", &["ana"])],
    )
    .await;
    mount_bot(&env.server).await;
    let orchestrator = orchestrator(&env);

    let report = orchestrator
        .run_cycle_at(live_request(&orchestrator, "afternoon"), at(ymd(2025, 6, 10)))
        .await;
    assert_eq!(report.counters.bucket(TemporalBucket::NotYet), 1);
    assert!(bot_activities(&env.server).await.is_empty());
}
