#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use harvester_core::{CpuSummary, EnvironmentSnapshot, HarvestEnvelope, MemoryInfo, ProcessUsage};
use harvester_engine::{
    HarvestSink, HostStatsError, HostStatsProvider, Link, TransportError, TransportFailure,
};
use serde_json::Value;

/// In-memory link whose availability is toggled by the test.
pub struct FakeLink {
    up: AtomicBool,
    opens: AtomicUsize,
    open_delay: Mutex<Duration>,
    sent: Mutex<Vec<(String, HarvestEnvelope)>>,
}

impl FakeLink {
    pub fn new(up: bool) -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(up),
            opens: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Makes every handshake and probe take `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, HarvestEnvelope)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_named(&self, event_name: &str) -> Vec<HarvestEnvelope> {
        self.sent()
            .into_iter()
            .filter(|(name, _)| name == event_name)
            .map(|(_, envelope)| envelope)
            .collect()
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::new(TransportFailure::Network, "link down"))
        }
    }
}

#[async_trait::async_trait]
impl Link for FakeLink {
    async fn open(&self) -> Result<(), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check()
    }

    async fn emit(&self, event_name: &str, envelope: &HarvestEnvelope) -> Result<(), TransportError> {
        self.check()?;
        self.sent
            .lock()
            .unwrap()
            .push((event_name.to_string(), envelope.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    harvested: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn values(&self, event_name: &str) -> Vec<Value> {
        self.harvested
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event_name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.harvested.lock().unwrap().len()
    }
}

impl HarvestSink for RecordingSink {
    fn harvest(&self, event_name: &str, data: Value) {
        self.harvested
            .lock()
            .unwrap()
            .push((event_name.to_string(), data));
    }
}

/// Host statistics with fixed answers.
pub struct FakeHost {
    pub fail_environment: bool,
    environment_threads: Mutex<Vec<ThreadId>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_environment: false,
            environment_threads: Mutex::new(Vec::new()),
        })
    }

    pub fn broken_environment() -> Arc<Self> {
        Arc::new(Self {
            fail_environment: true,
            environment_threads: Mutex::new(Vec::new()),
        })
    }

    /// Threads `environment` was called on, in call order.
    pub fn environment_threads(&self) -> Vec<ThreadId> {
        self.environment_threads.lock().unwrap().clone()
    }
}

impl HostStatsProvider for FakeHost {
    fn environment(&self) -> Result<EnvironmentSnapshot, HostStatsError> {
        self.environment_threads
            .lock()
            .unwrap()
            .push(thread::current().id());
        if self.fail_environment {
            return Err(HostStatsError::Unavailable("no /proc".to_string()));
        }
        Ok(EnvironmentSnapshot {
            title: "orders-api".to_string(),
            version: "1.4.2".to_string(),
            architecture: "x86_64".to_string(),
            platform: "linux".to_string(),
            host_name: "web-01".to_string(),
            pid: 4242,
            ip: vec!["10.1.2.3".to_string()],
            ram_gb: 7.5,
            cpu: CpuSummary::from_models(["Intel Xeon", "Intel Xeon", "Intel Xeon", "Intel Xeon"]),
        })
    }

    fn process_usage(&self) -> Result<ProcessUsage, HostStatsError> {
        Ok(ProcessUsage {
            cpu: 12.5,
            memory: 64 * 1024 * 1024,
            memory_info: MemoryInfo {
                rss: 64 * 1024 * 1024,
                vsize: 512 * 1024 * 1024,
            },
        })
    }

    fn uptime_secs(&self) -> f64 {
        90.0
    }
}
