//! Fishnet monitor agent
//!
//! Small unattended daemon installed next to a fishnet worker:
//! - Samples host metrics and the fishnet run state once per interval
//! - Reports each snapshot to the dashboard collector over HTTP
//! - Buffers undelivered snapshots on disk and retries them opportunistically
//!
//! One fully sequential cycle per interval; a bad cycle is logged and the
//! next one proceeds. Nothing stops the agent except a termination signal.

mod backlog;
mod config;
mod reporter;
mod sampler;
mod snapshot;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use backlog::BacklogStore;
use config::AgentConfig;
use reporter::{HttpReporter, Reporter, SendOutcome};
use sampler::SysinfoSampler;
use snapshot::{CpuTierEstimator, SnapshotBuilder};

/// Main agent state: one of everything, wired once at startup.
struct Agent {
    config: AgentConfig,
    builder: SnapshotBuilder,
    reporter: Box<dyn Reporter>,
    backlog: BacklogStore,
    consecutive_failures: u64,
}

impl Agent {
    /// Wire up the production agent from its configuration.
    async fn new(config: AgentConfig) -> Result<Self> {
        let backlog = BacklogStore::open(config.backlog_dir.clone())
            .await
            .context("failed to open backlog store")?;

        let reporter = HttpReporter::new(&config.endpoint, config::REQUEST_TIMEOUT)
            .context("failed to create reporter")?;

        let builder = SnapshotBuilder::new(
            &config,
            Box::new(SysinfoSampler::new()),
            Box::new(CpuTierEstimator),
        );

        Ok(Agent {
            config,
            builder,
            reporter: Box::new(reporter),
            backlog,
            consecutive_failures: 0,
        })
    }

    /// Run cycles forever, sleeping the configured interval between them.
    /// Returns only when a termination signal arrives at the sleep boundary.
    async fn run(&mut self) -> Result<()> {
        info!(
            endpoint = %self.config.endpoint,
            interval_secs = self.config.interval.as_secs(),
            "Starting report loop"
        );

        loop {
            if let Err(err) = self.run_cycle().await {
                error!("Cycle failed: {err:#}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Termination signal received, stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One collect-send-persist-drain cycle.
    async fn run_cycle(&mut self) -> Result<()> {
        let snapshot = self.builder.build();

        match self.reporter.send(&snapshot).await {
            SendOutcome::Delivered => {
                self.consecutive_failures = 0;
                debug!(timestamp = %snapshot.timestamp, "Snapshot delivered");
            }
            SendOutcome::Failed(reason) => {
                self.consecutive_failures += 1;
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    "Delivery failed: {reason}"
                );

                match self.backlog.persist(&snapshot).await {
                    Ok(key) => debug!(key = %key, "Snapshot persisted for retry"),
                    Err(err) => {
                        // This cycle's snapshot is lost; keep running.
                        error!("Failed to persist snapshot: {err:#}");
                    }
                }

                // Opportunistic retry of everything pending, including the
                // entry just written. The collector may only be flaky.
                self.backlog.drain_pending(self.reporter.as_ref()).await;
            }
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fishnet_agent=info")),
        )
        .init();

    let config = AgentConfig::from_env().context("invalid configuration")?;
    info!(
        agent = %config.agent_name,
        process = %config.process_name,
        backlog_dir = %config.backlog_dir.display(),
        "Fishnet monitor agent starting"
    );

    let mut agent = Agent::new(config).await.context("failed to create agent")?;
    agent.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::reporter::DeliveryError;
    use crate::sampler::{HostSample, MetricSampler, ProcessState};
    use crate::snapshot::Snapshot;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct ScriptedReporter {
        deliver: AtomicBool,
        seen: Mutex<Vec<Snapshot>>,
    }

    impl ScriptedReporter {
        fn new(deliver: bool) -> Arc<Self> {
            Arc::new(Self {
                deliver: AtomicBool::new(deliver),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Snapshot> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Reporter for Arc<ScriptedReporter> {
        async fn send(&self, snapshot: &Snapshot) -> SendOutcome {
            self.seen.lock().unwrap().push(snapshot.clone());
            if self.deliver.load(Ordering::SeqCst) {
                SendOutcome::Delivered
            } else {
                SendOutcome::Failed(DeliveryError::Transport("stubbed outage".to_string()))
            }
        }
    }

    struct FixedSampler;

    impl MetricSampler for FixedSampler {
        fn sample(&mut self) -> HostSample {
            HostSample {
                cpu_usage: 40.0,
                memory_usage: 50.0,
                disk_usage: 60.0,
                uptime_secs: 900,
                mean_process_cpu: 10.0,
            }
        }

        fn process_state(&mut self, _process_name: &str) -> ProcessState {
            ProcessState::Running
        }
    }

    async fn test_agent(reporter: Arc<ScriptedReporter>) -> (Agent, PathBuf) {
        let dir = std::env::temp_dir().join(format!("fishnet-agent-test-{}", Uuid::new_v4()));
        let config = AgentConfig::from_lookup(|key| {
            (key == "FISHNET_MONITOR_BACKLOG_DIR").then(|| dir.to_string_lossy().to_string())
        })
        .unwrap();

        let backlog = BacklogStore::open(config.backlog_dir.clone()).await.unwrap();
        let builder = SnapshotBuilder::new(
            &config,
            Box::new(FixedSampler),
            Box::new(CpuTierEstimator),
        );

        let agent = Agent {
            config,
            builder,
            reporter: Box::new(reporter),
            backlog,
            consecutive_failures: 0,
        };
        (agent, dir)
    }

    #[tokio::test]
    async fn test_delivered_cycle_leaves_backlog_empty() {
        let reporter = ScriptedReporter::new(true);
        let (mut agent, dir) = test_agent(reporter.clone()).await;

        agent.run_cycle().await.unwrap();

        assert_eq!(reporter.seen().len(), 1);
        assert_eq!(agent.backlog.pending_count().await, 0);
        assert_eq!(agent.consecutive_failures, 0);
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn test_failed_cycle_persists_exact_snapshot() {
        let reporter = ScriptedReporter::new(false);
        let (mut agent, dir) = test_agent(reporter.clone()).await;

        agent.run_cycle().await.unwrap();

        // The snapshot went out once directly and once via the drain pass.
        let seen = reporter.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(agent.backlog.pending_count().await, 1);
        assert_eq!(agent.consecutive_failures, 1);

        // The persisted entry is the exact snapshot produced this cycle.
        let verify = ScriptedReporter::new(true);
        agent.backlog.drain_pending(&verify).await;
        assert_eq!(verify.seen(), vec![seen[0].clone()]);
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn test_recovery_drains_prior_failures() {
        let reporter = ScriptedReporter::new(false);
        let (mut agent, dir) = test_agent(reporter.clone()).await;

        for _ in 0..3 {
            agent.run_cycle().await.unwrap();
        }
        assert_eq!(agent.backlog.pending_count().await, 3);
        assert_eq!(agent.consecutive_failures, 3);

        // Collector comes back: one drain pass clears everything pending.
        reporter.deliver.store(true, Ordering::SeqCst);
        let report = agent.backlog.drain_pending(agent.reporter.as_ref()).await;
        assert_eq!(report.delivered, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(agent.backlog.pending_count().await, 0);
        tokio::fs::remove_dir_all(dir).await.ok();
    }
}
