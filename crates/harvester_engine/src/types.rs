use std::fmt;

use harvester_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportFailure,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    InvalidHost,
    HttpStatus(u16),
    Timeout,
    Encode,
    Network,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::InvalidHost => write!(f, "invalid collector host"),
            TransportFailure::HttpStatus(code) => write!(f, "http status {code}"),
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::Encode => write!(f, "payload encoding failed"),
            TransportFailure::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostStatsError {
    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },
    #[error("host statistics unavailable: {0}")]
    Unavailable(String),
}

/// Why a single tick of a harvest job produced nothing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProducerError {
    #[error(transparent)]
    HostStats(#[from] HostStatsError),
    #[error("payload could not be serialized: {0}")]
    Serialize(String),
    #[error("producer panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

impl ProducerError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProducerError::Failed(message.into())
    }
}

impl From<serde_json::Error> for ProducerError {
    fn from(err: serde_json::Error) -> Self {
        ProducerError::Serialize(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("hook {hook} failed to install: {reason}")]
    Install { hook: String, reason: String },
    #[error("hook {hook} panicked during install: {reason}")]
    Panicked { hook: String, reason: String },
}

impl HookError {
    pub fn install(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        HookError::Install {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("the harvester must be created inside a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Renders a caught panic payload for logs.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
