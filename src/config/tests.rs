use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::{PartialBrokerSettings, PartialSettings, Settings};
use super::{load_config_from, HandlerErrorPolicy};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert!(settings.broker.topics.is_empty());
    assert!(settings.broker.answer_topics.is_empty());
    assert_eq!(settings.broker.default_prefetch, 1);
    assert_eq!(settings.broker.retry_max_count, 3);
    assert_eq!(settings.broker.retry_delay_ms, 10_000);
    assert_eq!(settings.broker.answer_poll_interval_ms, 10);
    assert_eq!(
        settings.broker.handler_error_policy,
        HandlerErrorPolicy::Propagate
    );
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn partial_settings_keep_defaults_for_missing_values() {
    let partial = PartialSettings {
        broker: Some(PartialBrokerSettings {
            default_prefetch: Some(4),
            ..Default::default()
        }),
        logging: None,
    };

    let settings = partial.merge_with_defaults();
    assert_eq!(settings.broker.default_prefetch, 4);
    assert_eq!(settings.broker.retry_max_count, 3);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn answer_poll_interval_is_never_zero() {
    let mut settings = Settings::default();
    settings.broker.answer_poll_interval_ms = 0;
    assert!(!settings.broker.answer_poll_interval().is_zero());
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("broker.toml");
    let toml = r#"
        [broker]
        topics = ["orders", "invoices"]
        answer_topics = ["replies"]
        default_prefetch = 2
        retry_max_count = 5
        handler_error_policy = "error_topic"

        [logging]
        level = "debug"
    "#;
    fs::write(&path, toml).expect("write config file");

    let cfg = load_config_from(path.to_str().expect("utf-8 path")).expect("load_config failed");
    assert_eq!(cfg.broker.topics, vec!["orders", "invoices"]);
    assert_eq!(cfg.broker.answer_topics, vec!["replies"]);
    assert_eq!(cfg.broker.default_prefetch, 2);
    assert_eq!(cfg.broker.retry_max_count, 5);
    assert_eq!(cfg.broker.retry_delay_ms, 10_000);
    assert_eq!(
        cfg.broker.handler_error_policy,
        HandlerErrorPolicy::ErrorTopic
    );
    assert_eq!(cfg.logging.level, "debug");
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("absent");

    let cfg = load_config_from(path.to_str().expect("utf-8 path")).expect("load_config failed");
    assert_eq!(cfg.broker.default_prefetch, 1);
    assert!(cfg.broker.topics.is_empty());
}

#[test]
#[serial]
fn environment_overrides_file() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("broker.toml");
    fs::write(&path, "[broker]\nretry_max_count = 5\n").expect("write config file");

    temp_env::with_vars(
        [
            ("MEMBROKER__BROKER__RETRY_MAX_COUNT", Some("7")),
            ("MEMBROKER__LOGGING__LEVEL", Some("warn")),
        ],
        || {
            let cfg = load_config_from(path.to_str().expect("utf-8 path"))
                .expect("load_config failed");
            assert_eq!(cfg.broker.retry_max_count, 7);
            assert_eq!(cfg.logging.level, "warn");
        },
    );
}
