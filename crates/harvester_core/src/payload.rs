use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One-shot description of the host, harvested once per connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    pub title: String,
    pub version: String,
    pub architecture: String,
    pub platform: String,
    pub host_name: String,
    pub pid: u32,
    pub ip: Vec<String>,
    #[serde(rename = "ram", serialize_with = "serialize_ram")]
    pub ram_gb: f64,
    #[serde(rename = "cpus")]
    pub cpu: CpuSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuSummary {
    pub count: usize,
    #[serde(rename = "type")]
    pub model: String,
}

impl CpuSummary {
    /// Builds a summary from per-core model names; the first core names the model.
    pub fn from_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut count = 0;
        let mut model = None;
        for name in models {
            count += 1;
            if model.is_none() {
                model = Some(name.into());
            }
        }
        Self {
            count,
            model: model.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

fn serialize_ram<S: Serializer>(ram_gb: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{ram_gb}gb"))
}

/// Point-in-time resource usage of the agent's own process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessUsage {
    /// CPU usage in percent of one core.
    pub cpu: f32,
    /// Resident set size in bytes.
    pub memory: u64,
    pub memory_info: MemoryInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub rss: u64,
    pub vsize: u64,
}

/// Payload of the periodic `process.info` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub usage: ProcessUsage,
    pub modules: BTreeMap<String, String>,
    /// Process uptime in seconds.
    pub uptime: f64,
}

/// Request details carried by a `web.request` event.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WebRequest {
    pub headers: BTreeMap<String, String>,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub params: BTreeMap<String, Value>,
}

/// Payload of a `web.request` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebTransaction {
    /// Wall time in milliseconds.
    pub duration: f64,
    pub request: WebRequest,
}

/// Payload of a `db.query` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTiming {
    /// Wall time in microseconds.
    pub duration: u64,
    pub query: String,
}
