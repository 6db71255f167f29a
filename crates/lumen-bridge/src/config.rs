//! Bridge configuration

use lumen_core::time::duration_ms;
use lumen_core::{EvolutionConfig, LumenError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LUMEN_BRIDGE_";

/// Bridge server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listen address
    pub bind_address: String,
    /// Backend authority base URL; `None` runs every session in fallback mode
    pub backend_url: Option<String>,
    /// Time allowed to open one backend leg
    #[serde(with = "duration_ms")]
    pub backend_connect_timeout: Duration,
    /// Ping period on an idle backend leg
    #[serde(with = "duration_ms")]
    pub backend_heartbeat_interval: Duration,
    /// A leg whose ping goes unanswered this long is treated as lost
    #[serde(with = "duration_ms")]
    pub backend_pong_timeout: Duration,
    /// Time allowed for the backend to answer one HTTP fallback request
    #[serde(with = "duration_ms")]
    pub backend_request_timeout: Duration,
    /// Capabilities advertised in `connected`
    pub capabilities: Vec<String>,
    /// Simulated work per Injection phase
    #[serde(with = "duration_ms")]
    pub injection_step: Duration,
    /// Admission limit for concurrent sessions
    pub max_sessions: usize,
    /// Constants for locally synthesized state
    pub evolution: EvolutionConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
            backend_url: None,
            backend_connect_timeout: Duration::from_secs(5),
            backend_heartbeat_interval: Duration::from_secs(30),
            backend_pong_timeout: Duration::from_secs(10),
            backend_request_timeout: Duration::from_secs(5),
            capabilities: ["experience", "state_sync", "query", "injection"]
                .into_iter()
                .map(String::from)
                .collect(),
            injection_step: Duration::from_millis(250),
            max_sessions: 1024,
            evolution: EvolutionConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LumenError::config(format!("invalid TOML: {e}")))
    }

    /// Read a TOML file, apply environment overrides and validate
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LumenError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn merge_with_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `LUMEN_BRIDGE_*` overrides from any key/value source
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match field {
                "BIND_ADDRESS" => self.bind_address = value,
                "BACKEND_URL" => {
                    self.backend_url = if value.is_empty() { None } else { Some(value) };
                }
                "BACKEND_CONNECT_TIMEOUT_MS" => {
                    self.backend_connect_timeout = Duration::from_millis(number(field, &value)?);
                }
                "BACKEND_HEARTBEAT_MS" => {
                    self.backend_heartbeat_interval =
                        Duration::from_millis(number(field, &value)?);
                }
                "BACKEND_PONG_TIMEOUT_MS" => {
                    self.backend_pong_timeout = Duration::from_millis(number(field, &value)?);
                }
                "BACKEND_REQUEST_TIMEOUT_MS" => {
                    self.backend_request_timeout = Duration::from_millis(number(field, &value)?);
                }
                "INJECTION_STEP_MS" => {
                    self.injection_step = Duration::from_millis(number(field, &value)?);
                }
                "MAX_SESSIONS" => self.max_sessions = number(field, &value)?,
                "CAPABILITIES" => {
                    self.capabilities = value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.max_sessions == 0 {
            return Err(LumenError::config("max_sessions must be greater than 0"));
        }
        let timeouts = [
            ("backend_connect_timeout", self.backend_connect_timeout),
            ("backend_heartbeat_interval", self.backend_heartbeat_interval),
            ("backend_pong_timeout", self.backend_pong_timeout),
            ("backend_request_timeout", self.backend_request_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, d)| d.is_zero()) {
            return Err(LumenError::config(format!("{name} must be greater than 0")));
        }
        self.backend_base()?;
        self.evolution.validate()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse().map_err(|e| {
            LumenError::config(format!("invalid bind_address '{}': {e}", self.bind_address))
        })
    }

    /// Parsed backend base URL
    pub fn backend_base(&self) -> Result<Option<Url>> {
        let Some(raw) = self.backend_url.as_deref() else {
            return Ok(None);
        };
        let url = Url::parse(raw)
            .map_err(|e| LumenError::config(format!("invalid backend_url '{raw}': {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Some(url)),
            other => Err(LumenError::config(format!(
                "backend_url must use ws or wss, got '{other}'"
            ))),
        }
    }
}

fn number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LumenError::config(format!("{ENV_PREFIX}{field}: '{value}' is not a number")))
}
