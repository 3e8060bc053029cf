//! Snapshot delivery to the collector
//!
//! A `Reporter` makes exactly one delivery attempt per call and classifies
//! the outcome; retry policy lives with the caller (the backlog store and
//! the scheduler loop), never here.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Why a delivery attempt failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The collector answered, but not with 201 Created.
    #[error("collector returned HTTP {0}")]
    Status(u16),
    /// Connection error, timeout, or any other transport-level failure.
    #[error("request failed: {0}")]
    Transport(String),
}

/// Outcome of a single delivery attempt.
#[derive(Debug)]
pub enum SendOutcome {
    Delivered,
    Failed(DeliveryError),
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }
}

/// Capability trait: deliver one snapshot to the collector.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn send(&self, snapshot: &Snapshot) -> SendOutcome;
}

/// Production reporter: one bounded-timeout HTTP POST per snapshot.
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReporter {
    pub fn new(endpoint: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn send(&self, snapshot: &Snapshot) -> SendOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .json(snapshot)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::CREATED => {
                debug!(endpoint = %self.endpoint, "Snapshot delivered");
                SendOutcome::Delivered
            }
            Ok(resp) => SendOutcome::Failed(DeliveryError::Status(resp.status().as_u16())),
            Err(err) => SendOutcome::Failed(DeliveryError::Transport(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FishnetStatus, SnapshotData};
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_snapshot() -> Snapshot {
        Snapshot {
            name: "test-host".to_string(),
            timestamp: Utc::now(),
            status: "online".to_string(),
            data: SnapshotData {
                cpu_usage: 12.5,
                memory_usage: 34.0,
                disk_usage: 56.0,
                uptime: 120,
                fishnet_status: FishnetStatus::Running,
                active_jobs: 1,
            },
        }
    }

    /// Minimal one-shot HTTP server: reads the request, answers with the
    /// given status line, and hands the raw request back for inspection.
    async fn stub_collector(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                // Headers done and body present (requests here are small).
                if request.windows(4).any(|w| w == b"\r\n\r\n") && request.ends_with(b"}") {
                    break;
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("{status_line}\r\ncontent-length: 0\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{addr}/api/stats"), handle)
    }

    #[tokio::test]
    async fn test_201_is_delivered() {
        let (endpoint, server) = stub_collector("HTTP/1.1 201 Created").await;
        let reporter = HttpReporter::new(&endpoint, std::time::Duration::from_secs(5)).unwrap();

        let outcome = reporter.send(&test_snapshot()).await;
        assert!(outcome.is_delivered());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/stats"));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.contains("\"fishnetStatus\":\"running\""));
    }

    #[tokio::test]
    async fn test_non_201_is_failed() {
        let (endpoint, server) = stub_collector("HTTP/1.1 500 Internal Server Error").await;
        let reporter = HttpReporter::new(&endpoint, std::time::Duration::from_secs(5)).unwrap();

        match reporter.send(&test_snapshot()).await {
            SendOutcome::Failed(DeliveryError::Status(500)) => {}
            other => panic!("expected Failed(Status(500)), got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_failed() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = format!("http://{addr}/api/stats");
        let reporter = HttpReporter::new(&endpoint, std::time::Duration::from_secs(5)).unwrap();

        match reporter.send(&test_snapshot()).await {
            SendOutcome::Failed(DeliveryError::Transport(_)) => {}
            other => panic!("expected Failed(Transport), got {other:?}"),
        }
    }
}
