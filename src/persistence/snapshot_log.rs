//! Health snapshot log: a JSON array, oldest first

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::write_atomic;
use crate::domain::HealthSnapshot;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SnapshotLog {
    path: PathBuf,
    /// Records kept after an append; 0 keeps everything
    retention: usize,
}

impl SnapshotLog {
    pub fn new(path: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            path: path.into(),
            retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable record. A missing or malformed file is empty history;
    /// individual records that no longer parse are skipped.
    pub async fn load(&self) -> Vec<HealthSnapshot> {
        match self.read().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot log unreadable");
                Vec::new()
            }
        }
    }

    /// As [`load`](Self::load), but an I/O failure other than a missing file
    /// is an error rather than empty history.
    async fn read(&self) -> Result<Vec<HealthSnapshot>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let records: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "snapshot log malformed, treating as empty");
                return Ok(Vec::new());
            }
        };

        let total = records.len();
        let snapshots: Vec<HealthSnapshot> = records
            .into_iter()
            .filter_map(|record| serde_json::from_value(record).ok())
            .collect();
        if snapshots.len() != total {
            debug!(skipped = total - snapshots.len(), "unparseable snapshot records skipped");
        }
        Ok(snapshots)
    }

    pub async fn latest(&self) -> Option<HealthSnapshot> {
        self.load().await.pop()
    }

    /// Append one record, drop the oldest beyond the retention cap and
    /// rewrite the file atomically. Returns the number of records kept.
    /// A log that exists but cannot be read is left untouched.
    pub async fn append(&self, snapshot: &HealthSnapshot) -> Result<usize> {
        let mut history = self.read().await?;
        history.push(snapshot.clone());

        if self.retention > 0 && history.len() > self.retention {
            let excess = history.len() - self.retention;
            history.drain(..excess);
        }

        let body = serde_json::to_vec_pretty(&history)?;
        write_atomic(&self.path, &body).await?;
        debug!(path = %self.path.display(), records = history.len(), "snapshot appended");
        Ok(history.len())
    }
}
