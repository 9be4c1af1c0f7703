use super::settings::{PartialBrokerSettings, PartialSettings, Settings};
use super::{BrokerBackend, load_config_from};
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

const NO_ENV: [(&str, Option<&str>); 4] = [
    ("PORT", None),
    ("PROJECT_ID", None),
    ("LENS_SERVER__PORT", None),
    ("LENS_BROKER__BACKEND", None),
];

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 6969);
    assert_eq!(settings.broker.backend, BrokerBackend::Memory);
    assert!(settings.broker.subscription_suffix.starts_with("pubsub_ui-"));
    assert_eq!(settings.broker.request_timeout_secs, 5);
    assert!(settings.history.enabled);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_merge_keeps_unspecified_defaults() {
    let partial = PartialSettings {
        broker: Some(PartialBrokerSettings {
            project_id: Some("demo".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let merged = Settings::default().merge(partial);
    assert_eq!(merged.broker.project_id, "demo");
    assert_eq!(merged.broker.endpoint, "http://localhost:8085");
    assert_eq!(merged.server.port, 6969);
}

#[test]
#[serial]
fn test_load_config_without_sources_uses_defaults() {
    temp_env::with_vars(NO_ENV, || {
        let tmp = TempDir::new().expect("create tempdir");
        let stem = tmp.path().join("missing");
        let cfg = load_config_from(stem.to_str().expect("utf8 path")).expect("load_config");
        assert_eq!(cfg.server.port, 6969);
        assert_eq!(cfg.broker.project_id, "local-project");
    });
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    temp_env::with_vars(NO_ENV, || {
        let tmp = TempDir::new().expect("create tempdir");
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [broker]
            backend = "rest"
            project_id = "file-project"
            pull_interval_ms = 50

            [history]
            enabled = false
        "#;
        fs::write(tmp.path().join("default.toml"), toml).expect("write config file");

        let stem = tmp.path().join("default");
        let cfg = load_config_from(stem.to_str().expect("utf8 path")).expect("load_config");
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.broker.backend, BrokerBackend::Rest);
        assert_eq!(cfg.broker.project_id, "file-project");
        assert_eq!(cfg.broker.pull_interval_ms, 50);
        assert!(!cfg.history.enabled);
        assert_eq!(cfg.log.level, "info");
    });
}

#[test]
#[serial]
fn test_env_overrides_file_and_legacy_vars_win() {
    let tmp = TempDir::new().expect("create tempdir");
    fs::write(tmp.path().join("default.toml"), "[server]\nport = 9000\n").expect("write");
    let stem = tmp.path().join("default");

    temp_env::with_vars(
        [
            ("LENS_SERVER__PORT", Some("7000")),
            ("LENS_BROKER__BACKEND", Some("rest")),
            ("PORT", None),
            ("PROJECT_ID", Some("legacy-project")),
        ],
        || {
            let cfg = load_config_from(stem.to_str().expect("utf8 path")).expect("load_config");
            assert_eq!(cfg.server.port, 7000);
            assert_eq!(cfg.broker.backend, BrokerBackend::Rest);
            assert_eq!(cfg.broker.project_id, "legacy-project");
        },
    );

    temp_env::with_vars(
        [
            ("LENS_SERVER__PORT", Some("7000")),
            ("LENS_BROKER__BACKEND", None),
            ("PORT", Some("7100")),
            ("PROJECT_ID", None),
        ],
        || {
            let cfg = load_config_from(stem.to_str().expect("utf8 path")).expect("load_config");
            assert_eq!(cfg.server.port, 7100);
        },
    );
}

#[test]
#[serial]
fn test_invalid_legacy_port_is_rejected() {
    temp_env::with_vars(
        [
            ("PORT", Some("not-a-port")),
            ("PROJECT_ID", None),
            ("LENS_SERVER__PORT", None),
            ("LENS_BROKER__BACKEND", None),
        ],
        || {
            let tmp = TempDir::new().expect("create tempdir");
            let stem = tmp.path().join("missing");
            assert!(load_config_from(stem.to_str().expect("utf8 path")).is_err());
        },
    );
}
