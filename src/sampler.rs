//! Host metric sampling via sysinfo
//!
//! Provides the `MetricSampler` capability the snapshot builder draws from:
//! - CPU / memory / disk utilization percentages
//! - System uptime
//! - Run state of the monitored fishnet process
//!
//! Sampling never fails past this boundary: anything the OS refuses to
//! answer degrades to a zeroed value or `ProcessState::Unknown`.

use sysinfo::{Disks, System};
use tracing::debug;

/// One reading of host resource utilization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    /// Global CPU utilization, 0-100.
    pub cpu_usage: f64,
    /// Memory utilization, 0-100.
    pub memory_usage: f64,
    /// Root filesystem utilization, 0-100.
    pub disk_usage: f64,
    /// Seconds since boot.
    pub uptime_secs: u64,
    /// Global CPU divided by core count; feeds the job-count heuristic.
    pub mean_process_cpu: f64,
}

/// Run state of the monitored target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
    /// Process enumeration yielded nothing usable.
    Unknown,
}

/// Capability trait: read current host utilization and target-process state.
///
/// Implementations absorb their own failures and always return a complete,
/// well-typed reading.
pub trait MetricSampler: Send {
    fn sample(&mut self) -> HostSample;
    fn process_state(&mut self, process_name: &str) -> ProcessState;
}

/// Production sampler backed by a persistent `sysinfo::System`.
///
/// CPU usage is a delta against the previous refresh; the cycle interval
/// between calls provides the measurement window, so the very first reading
/// of a process lifetime reports 0.
pub struct SysinfoSampler {
    sys: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self { sys }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSampler for SysinfoSampler {
    fn sample(&mut self) -> HostSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cpu_usage = self.sys.global_cpu_info().cpu_usage() as f64;
        let core_count = self.sys.cpus().len().max(1);
        let mean_process_cpu = cpu_usage / core_count as f64;

        let total_memory = self.sys.total_memory();
        let memory_usage = if total_memory > 0 {
            let used = total_memory - self.sys.available_memory();
            (used as f64 / total_memory as f64) * 100.0
        } else {
            0.0
        };

        let disk_usage = root_disk_usage();
        let uptime_secs = System::uptime();

        debug!(
            cpu = cpu_usage,
            memory = memory_usage,
            disk = disk_usage,
            uptime = uptime_secs,
            "Sampled host metrics"
        );

        HostSample {
            cpu_usage,
            memory_usage,
            disk_usage,
            uptime_secs,
            mean_process_cpu,
        }
    }

    fn process_state(&mut self, process_name: &str) -> ProcessState {
        self.sys.refresh_processes();
        let processes = self.sys.processes();

        if processes.is_empty() {
            return ProcessState::Unknown;
        }

        let running = processes.values().any(|proc| {
            proc.name().contains(process_name)
                || proc.cmd().iter().any(|arg| arg.contains(process_name))
        });

        if running {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        }
    }
}

/// Utilization of the root filesystem, or of the largest mounted disk when
/// no "/" mount exists (Windows). Zero when nothing is mounted.
fn root_disk_usage() -> f64 {
    let disks = Disks::new_with_refreshed_list();

    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));

    match disk {
        Some(disk) if disk.total_space() > 0 => {
            let used = disk.total_space() - disk.available_space();
            (used as f64 / disk.total_space() as f64) * 100.0
        }
        _ => 0.0,
    }
}
