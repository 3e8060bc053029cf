//! Durable backlog of undelivered snapshots
//!
//! One snapshot per JSON file in a known directory. Entries are written
//! with a temp-file-then-rename dance so a crash mid-write never leaves a
//! half-written `.json` that would trip a later drain, and deleted only
//! after that exact entry is delivered. No TTL: entries live until they
//! are delivered.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::reporter::Reporter;
use crate::snapshot::Snapshot;

/// Result of one drain pass over the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
}

/// File-backed store for snapshots awaiting redelivery.
pub struct BacklogStore {
    dir: PathBuf,
}

impl BacklogStore {
    /// Open (creating if needed) the backlog directory.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create backlog directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Durably persist one snapshot under a fresh unique key.
    ///
    /// The key combines the snapshot's creation second with a uuid, so two
    /// failures within the same clock tick still get distinct entries.
    pub async fn persist(&self, snapshot: &Snapshot) -> Result<String> {
        let key = format!("{}-{}.json", snapshot.timestamp.timestamp(), Uuid::new_v4());
        let path = self.dir.join(&key);
        let tmp_path = self.dir.join(format!("{key}.tmp"));

        let body = serde_json::to_vec(snapshot).context("failed to serialize snapshot")?;
        tokio::fs::write(&tmp_path, &body)
            .await
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("failed to commit {}", path.display()))?;

        debug!(key = %key, "Snapshot persisted to backlog");
        Ok(key)
    }

    /// Re-attempt delivery of every persisted entry, deleting each one that
    /// goes through. Entries are handled independently: a corrupt file or a
    /// failed send never stops the pass.
    pub async fn drain_pending(&self, reporter: &dyn Reporter) -> DrainReport {
        let mut delivered = 0;
        let mut remaining = 0;

        for path in self.entry_paths().await {
            let snapshot = match self.read_entry(&path).await {
                Some(snapshot) => snapshot,
                None => {
                    // Unreadable or malformed: leave it for inspection.
                    remaining += 1;
                    continue;
                }
            };

            if reporter.send(&snapshot).await.is_delivered() {
                delivered += 1;
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    // Delivered but not deleted: it will be re-sent next
                    // pass, which the collector tolerates (at-least-once).
                    warn!(path = %path.display(), error = %err, "Failed to delete delivered entry");
                }
            } else {
                remaining += 1;
            }
        }

        if delivered > 0 || remaining > 0 {
            info!(delivered, remaining, "Backlog drain pass complete");
        }
        DrainReport {
            delivered,
            remaining,
        }
    }

    /// Number of entries currently persisted.
    pub async fn pending_count(&self) -> usize {
        self.entry_paths().await.len()
    }

    /// All committed entry files, in no particular order.
    async fn entry_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Failed to read backlog directory");
                return paths;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        paths.push(path);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %self.dir.display(), error = %err, "Failed to enumerate backlog entry");
                    break;
                }
            }
        }
        paths
    }

    async fn read_entry(&self, path: &Path) -> Option<Snapshot> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Unreadable backlog entry, skipping");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Malformed backlog entry, skipping");
                None
            }
        }
    }
}
