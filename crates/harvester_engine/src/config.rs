use harvester_core::ConfigError;
use serde::Deserialize;

use crate::TransportSettings;

pub const DEFAULT_HOST: &str = "http://localhost:30000";
pub const DEFAULT_APP_NAME: &str = "Node Application";
pub const DEFAULT_PROCESS_INFO_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector base URL.
    pub host: String,
    /// Application name stamped on every envelope.
    pub name: String,
    pub process_info_interval_ms: u64,
    pub transport: TransportSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            name: DEFAULT_APP_NAME.to_string(),
            process_info_interval_ms: DEFAULT_PROCESS_INFO_INTERVAL_MS,
            transport: TransportSettings::default(),
        }
    }
}

impl AgentConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Checks that `host` is an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidHost {
            host: self.host.clone(),
            reason,
        };
        let url = url::Url::parse(&self.host).map_err(|err| invalid(err.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }
}
