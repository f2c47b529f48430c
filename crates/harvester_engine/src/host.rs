use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use harvester_core::{bytes_to_gb, CpuSummary, EnvironmentSnapshot, MemoryInfo, ProcessUsage};
use sysinfo::{Networks, Pid, ProcessesToUpdate, System};

use crate::HostStatsError;

/// Source of host and process facts. Implementations may block briefly; the
/// harvester calls [`HostStatsProvider::process_usage`] off the async workers.
pub trait HostStatsProvider: Send + Sync {
    /// One-shot description of the host and process.
    fn environment(&self) -> Result<EnvironmentSnapshot, HostStatsError>;

    /// Current CPU and memory usage of the process.
    fn process_usage(&self) -> Result<ProcessUsage, HostStatsError>;

    /// Seconds since the process started.
    fn uptime_secs(&self) -> f64;
}

/// [`HostStatsProvider`] backed by `sysinfo`, reporting on the current process.
pub struct SysinfoHostStats {
    system: Mutex<System>,
    pid: Pid,
    started: Instant,
}

impl SysinfoHostStats {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            pid: Pid::from_u32(std::process::id()),
            started: Instant::now(),
        }
    }
}

impl Default for SysinfoHostStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HostStatsProvider for SysinfoHostStats {
    fn environment(&self) -> Result<EnvironmentSnapshot, HostStatsError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_all();
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let title = system
            .process(self.pid)
            .map(|process| process.name().to_string_lossy().into_owned())
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

        Ok(EnvironmentSnapshot {
            title,
            version: env!("CARGO_PKG_VERSION").to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            platform: std::env::consts::OS.to_string(),
            host_name: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            pid: self.pid.as_u32(),
            ip: external_ipv4_addresses(),
            ram_gb: bytes_to_gb(system.total_memory()),
            cpu: CpuSummary::from_models(system.cpus().iter().map(|cpu| cpu.brand().to_string())),
        })
    }

    fn process_usage(&self) -> Result<ProcessUsage, HostStatsError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let process = system
            .process(self.pid)
            .ok_or(HostStatsError::ProcessNotFound {
                pid: self.pid.as_u32(),
            })?;

        Ok(ProcessUsage {
            cpu: process.cpu_usage(),
            memory: process.memory(),
            memory_info: MemoryInfo {
                rss: process.memory(),
                vsize: process.virtual_memory(),
            },
        })
    }

    fn uptime_secs(&self) -> f64 {
        let system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        match system.process(self.pid) {
            Some(process) if process.run_time() > 0 => process.run_time() as f64,
            _ => self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Non-loopback IPv4 addresses across all interfaces.
fn external_ipv4_addresses() -> Vec<String> {
    let networks = Networks::new_with_refreshed_list();
    let mut addresses: Vec<String> = networks
        .iter()
        .flat_map(|(_, data)| data.ip_networks().iter())
        .map(|network| network.addr)
        .filter(|addr| addr.is_ipv4() && !addr.is_loopback())
        .map(|addr| addr.to_string())
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}
