use std::env;
use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::{KeySettings, Settings};
use super::{load_config, load_config_from};
use crate::utils::error::HubError;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 3000);
    assert_eq!(settings.jwt.algorithm, "HS256");
    assert!(settings.hub.allow_anonymous);
    assert_eq!(settings.hub.cookie_name, "mercureAuthorization");
    assert_eq!(settings.hub.heartbeat_secs, 40);
    assert_eq!(settings.backlog.driver, "memory");
    assert_eq!(settings.backlog.max_entries, Some(10_000));
    assert!(settings.uses_default_key());
    assert!(settings.validate().is_ok());
}

#[test]
fn hub_url_defaults_to_listen_address() {
    let mut settings = Settings::default();
    assert_eq!(
        settings.server.hub_url(),
        "http://127.0.0.1:3000/.well-known/mercure"
    );

    settings.server.hub_url = Some("https://example.com/.well-known/mercure".into());
    assert_eq!(
        settings.server.hub_url(),
        "https://example.com/.well-known/mercure"
    );
}

#[test]
fn validate_rejects_unusable_settings() {
    let mut settings = Settings::default();
    settings.hub.queue_capacity = 0;
    assert!(matches!(settings.validate(), Err(HubError::Config(_))));

    let mut settings = Settings::default();
    settings.hub.heartbeat_secs = 0;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.jwt.key = String::new();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.backlog.driver = "redis".into();
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.server.hub_url = Some("not a url".into());
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.jwt.keys.push(KeySettings {
        kid: String::new(),
        algorithm: "HS256".into(),
        key: "secret".into(),
    });
    assert!(settings.validate().is_err());
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // Run from a temporary directory so load_config picks up
    // config/default.toml from there.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [jwt]
        key = "file_secret"
        subscriber_key = "subscriber_secret"

        [hub]
        allow_anonymous = false
        queue_capacity = 16

        [backlog]
        driver = "sled"
        max_age_secs = 60
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let loaded = load_config();

    // restore cwd before asserting so a failure does not leak state
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = loaded.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.jwt.key, "file_secret");
    assert_eq!(cfg.jwt.subscriber_key.as_deref(), Some("subscriber_secret"));
    assert!(!cfg.hub.allow_anonymous);
    assert_eq!(cfg.hub.queue_capacity, 16);
    assert_eq!(cfg.hub.heartbeat_secs, 40);
    assert_eq!(cfg.backlog.driver, "sled");
    assert_eq!(cfg.backlog.max_age_secs, Some(60));
    assert_eq!(cfg.backlog.max_entries, Some(10_000));
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("hub.toml");
    fs::write(&path, "[server]\nport = 9000\n").expect("write config file");
    let path = path.with_extension("");
    let path = path.to_str().expect("utf-8 path").to_string();

    temp_env::with_vars(
        [
            ("MERCURE__SERVER__PORT", Some("9100")),
            ("MERCURE__HUB__SUBSCRIPTIONS", Some("true")),
            ("MERCURE__HUB__CORS_ORIGINS", Some("https://a.example,https://b.example")),
            ("MERCURE__LOG__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config_from(&path).expect("load config");
            assert_eq!(cfg.server.port, 9100);
            assert!(cfg.hub.subscriptions);
            assert_eq!(
                cfg.hub.cors_origins,
                vec!["https://a.example".to_string(), "https://b.example".to_string()]
            );
            assert_eq!(cfg.log.level, "debug");
        },
    );
}

#[test]
#[serial]
fn invalid_environment_fails_validation() {
    temp_env::with_var("MERCURE__HUB__QUEUE_CAPACITY", Some("0"), || {
        let result = load_config_from("does/not/exist");
        assert!(matches!(result, Err(HubError::Config(_))));
    });
}
