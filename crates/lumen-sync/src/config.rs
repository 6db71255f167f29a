//! Sync Client configuration
//!
//! Loaded from TOML, then overridden by `LUMEN_SYNC_*` environment variables.
//! Durations are expressed in milliseconds in both places.

use lumen_core::time::duration_ms;
use lumen_core::{EvolutionConfig, LumenError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::backoff::ReconnectPolicy;
use crate::buffer::DEFAULT_BUFFER_CAPACITY;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LUMEN_SYNC_";

/// Sync Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncClientConfig {
    /// Base URL, e.g. `ws://127.0.0.1:8787/ws`; `None` means standalone
    pub endpoint: Option<String>,
    /// Stable identity of this instance
    pub instance_id: String,
    /// Platform tag sent with every connection and Experience
    pub platform: String,
    /// Starting score when no prior state is supplied
    pub initial_score: f64,
    /// Ping interval while connected
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Time allowed for a pong before the connection counts as lost
    #[serde(with = "duration_ms")]
    pub pong_timeout: Duration,
    /// Time allowed for one connection attempt
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Pause between consecutive drained Experiences
    #[serde(with = "duration_ms")]
    pub drain_pacing: Duration,
    /// Maximum buffered Experiences while offline
    pub buffer_capacity: usize,
    /// Notification channel capacity per subscriber
    pub notification_capacity: usize,
    /// Backoff settings
    pub reconnect: ReconnectPolicy,
    /// Evolution constants
    pub evolution: EvolutionConfig,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            instance_id: format!("instance-{}", uuid::Uuid::new_v4()),
            platform: "native".to_string(),
            initial_score: 0.5,
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            drain_pacing: Duration::from_millis(100),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            notification_capacity: 256,
            reconnect: ReconnectPolicy::default(),
            evolution: EvolutionConfig::default(),
        }
    }
}

impl SyncClientConfig {
    /// Config for one instance talking to `endpoint`
    pub fn new(instance_id: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            endpoint,
            ..Default::default()
        }
    }

    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LumenError::config(format!("invalid TOML: {e}")))
    }

    /// Read and parse a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LumenError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LUMEN_SYNC_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `LUMEN_SYNC_*` overrides from any key/value source
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "ENDPOINT" => {
                    self.endpoint = if value.is_empty() { None } else { Some(value) };
                }
                "INSTANCE_ID" => self.instance_id = value,
                "PLATFORM" => self.platform = value,
                "HEARTBEAT_MS" => self.heartbeat_interval = parse_millis(field, &value)?,
                "PONG_TIMEOUT_MS" => self.pong_timeout = parse_millis(field, &value)?,
                "CONNECT_TIMEOUT_MS" => self.connect_timeout = parse_millis(field, &value)?,
                "DRAIN_PACING_MS" => self.drain_pacing = parse_millis(field, &value)?,
                "BUFFER_CAPACITY" => self.buffer_capacity = parse_number(field, &value)?,
                "MAX_ATTEMPTS" => self.reconnect.max_attempts = parse_number(field, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(LumenError::config("instance_id must not be empty"));
        }
        if self.heartbeat_interval.is_zero() || self.pong_timeout.is_zero() {
            return Err(LumenError::config(
                "heartbeat_interval and pong_timeout must be greater than 0",
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(LumenError::config("connect_timeout must be greater than 0"));
        }
        if self.buffer_capacity == 0 {
            return Err(LumenError::config("buffer_capacity must be greater than 0"));
        }
        self.reconnect.validate()?;
        self.evolution.validate()?;
        self.connection_url().map(|_| ())
    }

    /// `<endpoint>/<instanceId>?platform=<platform>`, or `None` without an endpoint
    pub fn connection_url(&self) -> Result<Option<Url>> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Ok(None);
        };
        let mut url = Url::parse(endpoint)
            .map_err(|e| LumenError::config(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(LumenError::config(format!(
                "endpoint must use ws or wss, got '{}'",
                url.scheme()
            )));
        }
        url.path_segments_mut()
            .map_err(|()| LumenError::config(format!("endpoint '{endpoint}' cannot be a base")))?
            .pop_if_empty()
            .push(&self.instance_id);
        url.query_pairs_mut().append_pair("platform", &self.platform);
        Ok(Some(url))
    }
}

fn parse_millis(field: &str, value: &str) -> Result<Duration> {
    parse_number::<u64>(field, value).map(Duration::from_millis)
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LumenError::config(format!("{ENV_PREFIX}{field}: '{value}' is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_standalone() {
        let config = SyncClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.connection_url().unwrap().is_none());
    }

    #[test]
    fn test_connection_url_shape() {
        let mut config = SyncClientConfig::new("tab 7", Some("ws://127.0.0.1:8787/ws/".into()));
        config.platform = "web".into();
        let url = config.connection_url().unwrap().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8787/ws/tab%207?platform=web");
    }

    #[test]
    fn test_rejects_unusable_endpoint() {
        let config = SyncClientConfig::new("a", Some("not a url".into()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_websocket_endpoint() {
        let config = SyncClientConfig::new("a", Some("http://127.0.0.1:8787/ws".into()));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LumenError::Config { .. }));
        assert!(err.to_string().contains("ws or wss"));

        let secure = SyncClientConfig::new("a", Some("wss://sync.example/ws".into()));
        assert!(secure.validate().is_ok());
    }

    #[test]
    fn test_toml_and_overrides() {
        let mut config = SyncClientConfig::from_toml_str(
            r#"
            endpoint = "ws://localhost:9000/ws"
            instance_id = "phone-1"
            platform = "android"
            heartbeat_interval = 5000

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay, Duration::from_secs(1));

        config
            .apply_overrides([
                ("LUMEN_SYNC_ENDPOINT".to_string(), String::new()),
                ("LUMEN_SYNC_BUFFER_CAPACITY".to_string(), "20".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();
        assert!(config.endpoint.is_none());
        assert_eq!(config.buffer_capacity, 20);

        let err = config
            .apply_overrides([("LUMEN_SYNC_MAX_ATTEMPTS".to_string(), "many".to_string())])
            .unwrap_err();
        assert!(matches!(err, LumenError::Config { .. }));
    }
}
