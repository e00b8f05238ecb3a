//! Daemon configuration: `config.json` in the data directory, then
//! environment overrides.

use std::path::Path;
use std::time::Duration;

use cardtrain::config::ConfigError;
use cardtrain::ipc::DEFAULT_IPC_ADDR;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENV_API_URL: &str = "CARDTRAIN_API_URL";
pub const ENV_WS_URL: &str = "CARDTRAIN_WS_URL";
pub const ENV_IPC_ADDR: &str = "CARDTRAIN_IPC_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Base URL of the REST backend.
    pub api_url: String,
    /// Training-event WebSocket endpoint.
    pub ws_url: String,
    /// Local control socket.
    pub ipc_addr: String,
    pub handshake_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub log_capacity: usize,
    /// Lifetime of stored credentials.
    pub credential_days: i64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8881".to_string(),
            ws_url: "ws://127.0.0.1:8888/api/training/ws/training".to_string(),
            ipc_addr: DEFAULT_IPC_ADDR.to_string(),
            handshake_timeout_ms: 5_000,
            reconnect_delay_ms: 5_000,
            log_capacity: cardtrain::training_log::LOG_CAPACITY,
            credential_days: 1,
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: DaemonConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults; then apply env overrides.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            warn!("config file {:?} not found, using defaults", path);
            Self::default()
        };
        config.apply_overrides(|k| std::env::var(k).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_API_URL) {
            self.api_url = v;
        }
        if let Some(v) = lookup(ENV_WS_URL) {
            self.ws_url = v;
        }
        if let Some(v) = lookup(ENV_IPC_ADDR) {
            self.ipc_addr = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConfigError::Validation(format!(
                "ws_url must be a ws:// or wss:// URL, got '{}'",
                self.ws_url
            )));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "handshake_timeout_ms must be > 0".into(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::Validation("log_capacity must be > 0".into()));
        }
        if self.credential_days <= 0 {
            return Err(ConfigError::Validation("credential_days must be > 0".into()));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
