//! Loading client configuration from disk

#![allow(clippy::unwrap_used)]

use lumen_core::LumenError;
use lumen_sync::SyncClientConfig;
use std::io::Write;
use std::time::Duration;

#[test]
fn loads_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
endpoint = "ws://127.0.0.1:8787/ws"
instance_id = "tablet-3"
platform = "ios"
pong_timeout = 2500
drain_pacing = 0

[reconnect]
max_attempts = 8
max_delay = 60000

[evolution]
content_norm = 250.0
"#
    )
    .unwrap();

    let config = SyncClientConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.instance_id, "tablet-3");
    assert_eq!(config.pong_timeout, Duration::from_millis(2500));
    assert_eq!(config.drain_pacing, Duration::ZERO);
    assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(config.reconnect.max_attempts, 8);
    assert_eq!(config.reconnect.delay(10), Duration::from_secs(60));
    assert_eq!(config.evolution.content_norm, 250.0);
    assert_eq!(
        config.connection_url().unwrap().unwrap().as_str(),
        "ws://127.0.0.1:8787/ws/tablet-3?platform=ios"
    );
}

#[test]
fn rejects_invalid_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "instance_id = \"\"").unwrap();
    let err = SyncClientConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, LumenError::Config { .. }));

    let missing = file.path().with_extension("missing");
    assert!(SyncClientConfig::load_from_file(&missing).is_err());
}
