use std::sync::Arc;

use agent_logging::{agent_error, agent_info, agent_warn};
use harvester_core::{
    events, ConfigError, ConnectionEvent, ConnectionState, FilterCallback, FilterPipeline,
    HarvestEnvelope, ModuleRegistry, ProcessInfo,
};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::instrument::install_isolated;
use crate::{
    AgentConfig, HarvestError, HarvestSink, Hook, HookError, HostStatsProvider, HttpLink,
    Instrumentation, Link, ProducerError, Scheduler, SysinfoHostStats, Transport, Yield,
};

/// Jobs the harvester starts on connect and stops on disconnect.
pub const STANDARD_JOBS: &[&str] = &[events::PROCESS_INFO];

/// Filters, wraps and sends. Every harvest, scheduled or not, ends here.
struct Outbound {
    app_name: String,
    filters: Arc<FilterPipeline>,
    transport: Transport,
}

impl HarvestSink for Outbound {
    fn harvest(&self, event_name: &str, data: Value) {
        let data = self.filters.apply_filters(event_name, data, &[]);
        self.transport
            .send(event_name, HarvestEnvelope::new(self.app_name.clone(), data));
    }
}

/// Reacts to connection transitions with the standard jobs.
#[derive(Clone)]
struct Crops {
    outbound: Arc<Outbound>,
    scheduler: Scheduler,
    modules: ModuleRegistry,
    host: Arc<dyn HostStatsProvider>,
    process_info_interval_ms: u64,
}

impl Crops {
    async fn on_connected(&self) {
        self.harvest_environment().await;
        if !self.outbound.transport.is_connected() {
            return;
        }
        self.start_process_info();
    }

    fn on_disconnected(&self) {
        for name in STANDARD_JOBS {
            self.scheduler.stop_harvesting(name);
        }
    }

    async fn harvest_environment(&self) {
        let host = self.host.clone();
        let snapshot = match tokio::task::spawn_blocking(move || host.environment()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                agent_warn!("skipping environment snapshot: {}", err);
                return;
            }
            Err(err) => {
                agent_error!("environment snapshot task failed: {}", err);
                return;
            }
        };
        match serde_json::to_value(&snapshot) {
            Ok(value) => self.outbound.harvest(events::ENVIRONMENT, value),
            Err(err) => agent_warn!("failed to encode environment snapshot: {}", err),
        }
    }

    fn start_process_info(&self) {
        let host = self.host.clone();
        let modules = self.modules.clone();
        let started = self.scheduler.start_harvesting(
            events::PROCESS_INFO,
            self.process_info_interval_ms,
            move || Yield::deferred(sample_process_info(host.clone(), modules.clone())),
        );
        if let Err(err) = started {
            agent_error!("could not start {} job: {}", events::PROCESS_INFO, err);
        }
    }
}

async fn sample_process_info(
    host: Arc<dyn HostStatsProvider>,
    modules: ModuleRegistry,
) -> Result<Value, ProducerError> {
    let sampler = host.clone();
    let usage = tokio::task::spawn_blocking(move || sampler.process_usage())
        .await
        .map_err(|err| ProducerError::Panicked(err.to_string()))??;

    let info = ProcessInfo {
        usage,
        modules: modules.snapshot(),
        uptime: host.uptime_secs(),
    };
    Ok(serde_json::to_value(info)?)
}

async fn watch_connection(mut events: broadcast::Receiver<ConnectionEvent>, transport: Transport, crops: Crops) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Connected) => crops.on_connected().await,
            Ok(ConnectionEvent::Disconnected) => crops.on_disconnected(),
            Err(RecvError::Lagged(skipped)) => {
                agent_warn!("missed {} connection events; resyncing", skipped);
                match transport.state() {
                    ConnectionState::Connected => crops.on_connected().await,
                    ConnectionState::Disconnected => crops.on_disconnected(),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// The agent: owns the filter pipeline, transport, scheduler and module
/// registry, and is the single sink every harvested value goes through.
///
/// Dropping the harvester stops all jobs and closes the transport.
pub struct Harvester {
    config: AgentConfig,
    outbound: Arc<Outbound>,
    scheduler: Scheduler,
    modules: ModuleRegistry,
    listener: JoinHandle<()>,
}

impl Harvester {
    /// Builds an agent that reports on this process to `config.host` over
    /// HTTP. Must be called from within a tokio runtime.
    pub fn new(config: AgentConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        let link = HttpLink::new(&config.host, &config.transport)?;
        Self::with_parts(config, Arc::new(link), Arc::new(SysinfoHostStats::new()))
    }

    /// Builds an agent over an explicit link and host statistics source.
    pub fn with_parts(
        config: AgentConfig,
        link: Arc<dyn Link>,
        host: Arc<dyn HostStatsProvider>,
    ) -> Result<Self, HarvestError> {
        let transport = Transport::new(link, config.transport.clone())?;
        let outbound = Arc::new(Outbound {
            app_name: config.name.clone(),
            filters: Arc::new(FilterPipeline::new()),
            transport: transport.clone(),
        });
        let scheduler = Scheduler::new(outbound.clone())?;
        let modules = ModuleRegistry::new();

        let crops = Crops {
            outbound: outbound.clone(),
            scheduler: scheduler.clone(),
            modules: modules.clone(),
            host,
            process_info_interval_ms: config.process_info_interval_ms,
        };
        let listener = tokio::spawn(watch_connection(transport.subscribe(), transport, crops));

        Ok(Self {
            config,
            outbound,
            scheduler,
            modules,
            listener,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Starts connecting to the collector.
    pub fn start(&self) {
        agent_info!("harvester {:?} connecting to {}", self.config.name, self.config.host);
        self.outbound.transport.connect();
    }

    /// Stops every job and closes the connection.
    pub fn shutdown(&self) {
        self.scheduler.stop_all();
        self.outbound.transport.close();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.outbound.transport.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.outbound.transport.subscribe()
    }

    /// Filters `data` for `event_name`, wraps it and sends it. Dropped while
    /// disconnected.
    pub fn harvest(&self, event_name: &str, data: Value) {
        self.outbound.harvest(event_name, data);
    }

    pub fn start_harvesting<F>(&self, name: &str, interval_ms: u64, producer: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Yield + Send + Sync + 'static,
    {
        self.scheduler.start_harvesting(name, interval_ms, producer)
    }

    pub fn stop_harvesting(&self, name: &str) {
        self.scheduler.stop_harvesting(name);
    }

    pub fn is_harvesting(&self, name: &str) -> bool {
        self.scheduler.is_harvesting(name)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn add_filter(&self, name: &str, callback: FilterCallback, priority: Option<i32>) -> Result<(), ConfigError> {
        self.outbound.filters.add_filter(name, callback, priority)
    }

    pub fn remove_filter(&self, name: &str, callback: &FilterCallback) -> Result<usize, ConfigError> {
        self.outbound.filters.remove_filter(name, callback)
    }

    pub fn apply_filters(&self, name: &str, data: Value, extra: &[Value]) -> Value {
        self.outbound.filters.apply_filters(name, data, extra)
    }

    pub fn register_module(&self, name: impl Into<String>, version: impl Into<String>) {
        self.modules.register_module(name, version);
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// The capability object handed to hooks.
    pub fn instrumentation(&self) -> Instrumentation {
        Instrumentation::new(self.outbound.clone(), self.modules.clone())
    }

    pub fn install_hook(&self, hook: &dyn Hook) -> Result<(), HookError> {
        install_isolated(hook, self.instrumentation())
    }

    /// Installs each hook independently; failures are collected, not fatal.
    pub fn install_hooks<'a, I>(&self, hooks: I) -> Vec<HookError>
    where
        I: IntoIterator<Item = &'a dyn Hook>,
    {
        hooks
            .into_iter()
            .filter_map(|hook| self.install_hook(hook).err())
            .collect()
    }
}

impl Drop for Harvester {
    fn drop(&mut self) {
        self.listener.abort();
        self.shutdown();
    }
}
