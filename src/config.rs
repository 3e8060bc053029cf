//! Agent configuration resolved once at startup
//!
//! All options come from environment variables and are frozen into an
//! immutable `AgentConfig` that the rest of the agent borrows. There is no
//! runtime mutation and no global settings object.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables recognized by the agent.
const ENV_ENDPOINT: &str = "FISHNET_MONITOR_URL";
const ENV_INTERVAL: &str = "FISHNET_MONITOR_INTERVAL";
const ENV_NAME: &str = "FISHNET_MONITOR_NAME";
const ENV_PROCESS: &str = "FISHNET_PROCESS_NAME";
const ENV_BACKLOG_DIR: &str = "FISHNET_MONITOR_BACKLOG_DIR";
const ENV_LOG_FILE: &str = "FISHNET_LOG_FILE";

const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/stats";
const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_PROCESS_NAME: &str = "fishnet";

/// Per-request delivery timeout. Bounds how long one cycle can block on the
/// network before the snapshot is classified as undelivered.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable agent configuration, built once in `main`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Collector endpoint receiving snapshot POSTs.
    pub endpoint: String,
    /// Fixed cycle period. Does not adapt to failure streaks.
    pub interval: Duration,
    /// Reporting host identifier (`name` field on the wire).
    pub agent_name: String,
    /// Process name matched against running processes.
    pub process_name: String,
    /// Directory holding undelivered snapshots.
    pub backlog_dir: PathBuf,
    /// Optional fishnet log probed for an authoritative active-job count.
    pub fishnet_log: Option<PathBuf>,
}

impl AgentConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary lookup. Split out from
    /// [`from_env`](Self::from_env) so tests don't have to mutate the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(ENV_ENDPOINT).unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let interval_secs = match lookup(ENV_INTERVAL) {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("{ENV_INTERVAL} must be an integer, got {raw:?}"))?,
            None => DEFAULT_INTERVAL_SECS,
        };
        if interval_secs == 0 {
            anyhow::bail!("{ENV_INTERVAL} must be at least 1 second");
        }

        let agent_name = lookup(ENV_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().to_string());

        let process_name =
            lookup(ENV_PROCESS).unwrap_or_else(|| DEFAULT_PROCESS_NAME.to_string());

        let backlog_dir = lookup(ENV_BACKLOG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_backlog_dir);

        let fishnet_log = lookup(ENV_LOG_FILE).map(PathBuf::from);

        Ok(AgentConfig {
            endpoint,
            interval: Duration::from_secs(interval_secs),
            agent_name,
            process_name,
            backlog_dir,
            fishnet_log,
        })
    }
}

/// Default backlog location under the platform's local data directory,
/// falling back to the system temp dir on exotic platforms.
fn default_backlog_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("fishnet-agent").join("backlog"))
        .unwrap_or_else(|| std::env::temp_dir().join("fishnet-agent-backlog"))
}
