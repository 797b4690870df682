//! Configuration file, environment overrides and preflight together.

use std::collections::HashMap;

use duewatch::config::DuewatchConfig;
use duewatch::startup::{PreflightSeverity, preflight};

use crate::helpers::test_env;

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/config.toml");

    let mut config = DuewatchConfig::default();
    config.cycle.horizon_days = 5;
    config.cycle.utc_offset = "+01:00".into();
    config.cycle.profiles.insert("evening".into(), 2);
    config.webhook.url = Some("https://hooks.example.com/T1".into());
    config.resilience = config.resilience.with_policy(
        "task_source",
        duewatch_guard::DependencyPolicy {
            failure_threshold: 9,
            ..Default::default()
        },
    );
    config.save_to_file(&path).unwrap();

    let loaded = DuewatchConfig::from_file(&path).unwrap();
    assert_eq!(loaded.cycle.horizon_days, 5);
    assert_eq!(loaded.cycle.utc_offset, "+01:00");
    assert_eq!(loaded.cycle.horizon_for_profile("evening"), Some(2));
    assert_eq!(loaded.webhook.url.as_deref(), Some("https://hooks.example.com/T1"));
    assert_eq!(loaded.resilience, config.resilience);
    assert_eq!(loaded.resilience.policy_for("task_source").failure_threshold, 9);
    loaded.validate().unwrap();
}

#[test]
fn partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[cycle]\nhorizon_days = 7\n").unwrap();

    let loaded = DuewatchConfig::from_file(&path).unwrap();
    let defaults = DuewatchConfig::default();
    assert_eq!(loaded.cycle.horizon_days, 7);
    assert_eq!(loaded.cycle.overdue_cutoff_days, defaults.cycle.overdue_cutoff_days);
    assert_eq!(loaded.cycle.open_statuses, defaults.cycle.open_statuses);
    assert!(loaded.cycle.dry_run);
}

#[test]
fn environment_overrides_file_values() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DUEWATCH_SOURCE_CLIENT_SECRET", "from-env"),
        ("DUEWATCH_HORIZON_DAYS", "4"),
        ("DUEWATCH_DRY_RUN", "false"),
        ("DUEWATCH_WEBHOOK_URL", "  "),
    ]);
    let mut config = DuewatchConfig::default();
    config.webhook.url = Some("https://hooks.example.com/T1".into());
    config
        .apply_env_overrides(|key| vars.get(key).map(|v| (*v).to_owned()))
        .unwrap();

    assert_eq!(config.source.client_secret, "from-env");
    assert_eq!(config.cycle.horizon_days, 4);
    assert!(!config.cycle.dry_run);
    // Blank variables do not clear configured values.
    assert_eq!(config.webhook.url.as_deref(), Some("https://hooks.example.com/T1"));

    let bad = HashMap::from([("DUEWATCH_DRY_RUN", "perhaps")]);
    let err = DuewatchConfig::default()
        .apply_env_overrides(|key| bad.get(key).map(|v| (*v).to_owned()))
        .unwrap_err();
    assert!(err.to_string().contains("DUEWATCH_DRY_RUN"), "{err}");
}

#[tokio::test]
async fn test_environment_passes_preflight() {
    let mut env = test_env(&["ana"]).await;
    env.config.gateway.bearer_token = Some("gw-token".into());

    let issues = preflight(&env.config);
    assert!(issues.is_empty(), "{issues:?}");

    env.config.webhook.url = Some("not a url".into());
    env.config.bot.app_password.clear();
    let issues = preflight(&env.config);
    let errors: Vec<&str> = issues
        .iter()
        .filter(|i| i.severity == PreflightSeverity::Error)
        .map(|i| i.id)
        .collect();
    assert_eq!(errors, ["bot.credentials", "webhook.url"]);
}
