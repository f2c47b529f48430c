//! Harvester engine: scheduling, transport and the agent composition root.
mod config;
mod harvester;
mod hooks;
mod host;
mod instrument;
mod link;
mod scheduler;
mod transport;
mod types;

pub use config::{AgentConfig, DEFAULT_APP_NAME, DEFAULT_HOST, DEFAULT_PROCESS_INFO_INTERVAL_MS};
pub use harvester::{Harvester, STANDARD_JOBS};
pub use hooks::{QueryHook, QuerySpan, RequestSpan, WebTransactionHook};
pub use host::{HostStatsProvider, SysinfoHostStats};
pub use instrument::{Hook, Instrumentation};
pub use link::{HttpLink, Link, TransportSettings};
pub use scheduler::{HarvestSink, Producer, Scheduler, Yield};
pub use transport::Transport;
pub use types::{
    HarvestError, HookError, HostStatsError, ProducerError, TransportError, TransportFailure,
};
