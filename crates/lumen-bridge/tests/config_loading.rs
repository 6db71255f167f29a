//! Loading bridge configuration from disk

#![allow(clippy::unwrap_used)]

use lumen_bridge::BridgeConfig;
use lumen_core::LumenError;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{text}").unwrap();
    file
}

#[test]
fn loads_toml_file() {
    let file = config_file(
        r#"
bind_address = "0.0.0.0:9100"
backend_url = "wss://core.internal:7000/sync"
backend_connect_timeout = 1500
backend_heartbeat_interval = 20000
backend_pong_timeout = 4000
backend_request_timeout = 2500
capabilities = ["experience", "query"]
injection_step = 100
max_sessions = 64

[evolution]
content_norm = 250.0
"#,
    );

    let config = BridgeConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.socket_addr().unwrap().port(), 9100);
    assert_eq!(config.backend_connect_timeout, Duration::from_millis(1500));
    assert_eq!(config.backend_heartbeat_interval, Duration::from_secs(20));
    assert_eq!(config.backend_pong_timeout, Duration::from_secs(4));
    assert_eq!(config.backend_request_timeout, Duration::from_millis(2500));
    assert_eq!(config.capabilities, vec!["experience", "query"]);
    assert_eq!(config.injection_step, Duration::from_millis(100));
    assert_eq!(config.max_sessions, 64);
    assert_eq!(config.evolution.content_norm, 250.0);
    assert_eq!(
        config.backend_base().unwrap().unwrap().as_str(),
        "wss://core.internal:7000/sync"
    );
}

#[test]
fn missing_fields_take_defaults() {
    let file = config_file(r#"bind_address = "127.0.0.1:9200""#);

    let config = BridgeConfig::load_from_file(file.path()).unwrap();
    let defaults = BridgeConfig::default();
    assert_eq!(config.backend_heartbeat_interval, defaults.backend_heartbeat_interval);
    assert_eq!(config.max_sessions, defaults.max_sessions);
    assert_eq!(config.capabilities, defaults.capabilities);
}

#[test]
fn rejects_non_websocket_backend() {
    let file = config_file(r#"backend_url = "http://core.internal:7000/sync""#);
    let err = BridgeConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, LumenError::Config { .. }));
    assert!(err.to_string().contains("ws or wss"));
}

#[test]
fn rejects_invalid_files() {
    let zero_sessions = config_file("max_sessions = 0");
    assert!(matches!(
        BridgeConfig::load_from_file(zero_sessions.path()),
        Err(LumenError::Config { .. })
    ));

    let zero_timeout = config_file("backend_pong_timeout = 0");
    let err = BridgeConfig::load_from_file(zero_timeout.path()).unwrap_err();
    assert!(err.to_string().contains("backend_pong_timeout"));

    let not_toml = config_file("max_sessions = [");
    assert!(BridgeConfig::load_from_file(not_toml.path()).is_err());

    let missing = zero_sessions.path().with_extension("missing");
    assert!(BridgeConfig::load_from_file(&missing).is_err());
}
