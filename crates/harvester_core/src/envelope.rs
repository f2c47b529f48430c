use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard event names.
pub mod events {
    pub const ENVIRONMENT: &str = "environment";
    pub const PROCESS_INFO: &str = "process.info";
    pub const WEB_REQUEST: &str = "web.request";
    pub const DB_QUERY: &str = "db.query";
}

/// The unit sent over the wire under an event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestEnvelope {
    pub app_name: String,
    pub data: Value,
}

impl HarvestEnvelope {
    pub fn new(app_name: impl Into<String>, data: Value) -> Self {
        Self {
            app_name: app_name.into(),
            data,
        }
    }
}
