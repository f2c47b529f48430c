use thiserror::Error;

/// Rejected arguments. Raised synchronously by the call that introduced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("filter name must be a string with 1 or more characters")]
    EmptyFilterName,
    #[error("harvest job name must be a string with 1 or more characters")]
    EmptyJobName,
    #[error("invalid collector host {host:?}: {reason}")]
    InvalidHost { host: String, reason: String },
}
