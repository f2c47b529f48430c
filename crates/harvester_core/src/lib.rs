//! Harvester core: runtime-free building blocks of the telemetry agent.
//!
//! Everything here is synchronous: the filter pipeline, the module registry,
//! the connection state machine and the payload types put on the wire.
mod effect;
mod envelope;
mod error;
mod filter;
mod interval;
mod modules;
mod msg;
mod payload;
mod state;
mod update;

pub use effect::ConnectionEvent;
pub use envelope::{events, HarvestEnvelope};
pub use error::ConfigError;
pub use filter::{filter, FilterCallback, FilterFn, FilterPipeline, DEFAULT_PRIORITY};
pub use interval::{coerce_interval_ms, job_interval, DEFAULT_INTERVAL_MS};
pub use modules::ModuleRegistry;
pub use msg::LinkSignal;
pub use payload::{
    bytes_to_gb, CpuSummary, EnvironmentSnapshot, MemoryInfo, ProcessInfo, ProcessUsage,
    QueryTiming, WebRequest, WebTransaction,
};
pub use state::ConnectionState;
pub use update::update;
