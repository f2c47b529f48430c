use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use harvester_engine::AgentConfig;
use log::LevelFilter;
use serde::Deserialize;

use super::logging::LogDestination;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct LogSettings {
    pub destination: LogDestination,
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            destination: LogDestination::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LogSettings {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.level).map_err(|_| anyhow!("unknown log level {:?}", self.level))
    }
}

/// Contents of the agent's RON settings file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AgentSettings {
    pub agent: AgentConfig,
    pub log: LogSettings,
}

/// Reads settings from `path`, or returns the defaults when no path is given.
pub(crate) fn load_settings(path: Option<&Path>) -> Result<AgentSettings> {
    let Some(path) = path else {
        return Ok(AgentSettings::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;
    let settings: AgentSettings = ron::from_str(&content)
        .with_context(|| format!("failed to parse settings in {}", path.display()))?;
    settings
        .agent
        .validate()
        .with_context(|| format!("invalid agent settings in {}", path.display()))?;
    settings.log.level_filter()?;
    Ok(settings)
}
