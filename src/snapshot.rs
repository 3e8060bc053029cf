//! Snapshot data contract and builder
//!
//! A `Snapshot` is one immutable timestamped report record: host metrics
//! plus the fishnet run state, serialized exactly as the collector expects
//! it. The builder also owns the active-job estimate: an optional log-file
//! probe first, then a pluggable CPU-tier heuristic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::sampler::{MetricSampler, ProcessState};

/// One report record (matches the collector's POST body schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    /// Always "online": records that the agent itself was alive at
    /// collection time, not the state of the monitored process.
    pub status: String,
    pub data: SnapshotData,
}

/// Metric payload of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub uptime: u64,
    pub fishnet_status: FishnetStatus,
    pub active_jobs: u32,
}

/// Run state of the fishnet worker as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FishnetStatus {
    Running,
    Stopped,
    Unknown,
}

impl From<ProcessState> for FishnetStatus {
    fn from(state: ProcessState) -> Self {
        match state {
            ProcessState::Running => FishnetStatus::Running,
            ProcessState::Stopped => FishnetStatus::Stopped,
            ProcessState::Unknown => FishnetStatus::Unknown,
        }
    }
}

/// Strategy for estimating the active-job count when fishnet exposes no
/// authoritative figure. Only consulted while the process is running.
pub trait JobEstimator: Send {
    fn estimate(&self, mean_process_cpu: f64) -> u32;
}

/// Default estimator: tiered mapping of mean per-process CPU to a coarse
/// job count.
pub struct CpuTierEstimator;

impl JobEstimator for CpuTierEstimator {
    fn estimate(&self, mean_process_cpu: f64) -> u32 {
        if mean_process_cpu >= 50.0 {
            3
        } else if mean_process_cpu >= 20.0 {
            2
        } else if mean_process_cpu >= 5.0 {
            1
        } else {
            0
        }
    }
}

/// Assembles snapshots from sampler output. Infallible: the sampler absorbs
/// its own errors, so `build` always yields a complete record.
pub struct SnapshotBuilder {
    agent_name: String,
    process_name: String,
    fishnet_log: Option<PathBuf>,
    sampler: Box<dyn MetricSampler>,
    estimator: Box<dyn JobEstimator>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl SnapshotBuilder {
    pub fn new(
        config: &AgentConfig,
        sampler: Box<dyn MetricSampler>,
        estimator: Box<dyn JobEstimator>,
    ) -> Self {
        Self {
            agent_name: config.agent_name.clone(),
            process_name: config.process_name.clone(),
            fishnet_log: config.fishnet_log.clone(),
            sampler,
            estimator,
            last_timestamp: None,
        }
    }

    /// Build one snapshot from current system state.
    pub fn build(&mut self) -> Snapshot {
        let sample = self.sampler.sample();
        let state = self.sampler.process_state(&self.process_name);

        let active_jobs = match state {
            ProcessState::Running => self
                .log_job_count()
                .unwrap_or_else(|| self.estimator.estimate(sample.mean_process_cpu)),
            // Not running: no jobs, regardless of what the CPU says.
            ProcessState::Stopped | ProcessState::Unknown => 0,
        };

        Snapshot {
            name: self.agent_name.clone(),
            timestamp: self.next_timestamp(),
            status: "online".to_string(),
            data: SnapshotData {
                cpu_usage: sample.cpu_usage,
                memory_usage: sample.memory_usage,
                disk_usage: sample.disk_usage,
                uptime: sample.uptime_secs,
                fishnet_status: state.into(),
                active_jobs,
            },
        }
    }

    /// Current UTC time, clamped so successive snapshots never move
    /// backwards even if the wall clock steps.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now < last {
                now = last;
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    /// Probe the configured fishnet log for an authoritative job count.
    fn log_job_count(&self) -> Option<u32> {
        let path = self.fishnet_log.as_deref()?;
        match probe_log_jobs(path) {
            Some(count) => {
                debug!(count, "Active job count read from fishnet log");
                Some(count)
            }
            None => None,
        }
    }
}

/// How many trailing log lines the job probe inspects.
const LOG_TAIL_LINES: usize = 50;

/// How much of the log's end is read when probing. Fishnet logs grow without
/// rotation on some installs; never pull the whole file into memory.
const LOG_TAIL_BYTES: u64 = 64 * 1024;

/// Scan the tail of a fishnet log for the most recent `active jobs: N`
/// line. Returns None when the file is unreadable or says nothing.
pub fn probe_log_jobs(path: &Path) -> Option<u32> {
    let content = match read_log_tail(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Could not read fishnet log");
            return None;
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let tail = lines.len().saturating_sub(LOG_TAIL_LINES);

    for line in lines[tail..].iter().rev() {
        // Find and slice within the same lowercased copy: byte offsets in
        // `lower` are not valid in `line` when lowercasing changes a
        // character's length. Digits are ASCII, so parsing from the
        // lowercased text is lossless.
        let lower = line.to_lowercase();
        if let Some(idx) = lower.find("active jobs:") {
            let rest = &lower[idx + "active jobs:".len()..];
            if let Some(count) = rest.split_whitespace().next().and_then(|t| t.parse().ok()) {
                return Some(count);
            }
        }
    }

    None
}

/// Read at most the last `LOG_TAIL_BYTES` of the file. The truncation point
/// may fall mid-line or mid-character; the lossy decode and line split
/// discard at worst the oldest partial line.
fn read_log_tail(path: &Path) -> std::io::Result<String> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len > LOG_TAIL_BYTES {
        file.seek(SeekFrom::End(-(LOG_TAIL_BYTES as i64)))?;
    }

    let mut buf = Vec::with_capacity(LOG_TAIL_BYTES.min(len) as usize);
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
