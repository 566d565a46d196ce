//! Alert state store
//!
//! Hysteresis over consecutive probe results, keyed by check name. A key
//! starts alerting only after `fails_for_alert` consecutive failures and
//! clears only after `successes_to_clear` consecutive successes. The same
//! file carries the Plex auto-repair cooldown timestamp.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::write_atomic;
use crate::domain::{AlertEntry, AlertStatus, Evaluation, Thresholds, Transition};
use crate::error::Result;
use crate::probes::ProbeOutcome;

/// Cooldown key for automatic Plex recovery
pub const PLEX_AUTOREPAIR_KEY: &str = "plex_autorepair";

#[derive(Debug)]
pub struct AlertStateStore {
    path: PathBuf,
    entries: BTreeMap<String, AlertEntry>,
}

impl AlertStateStore {
    /// Read the state file. Absent or corrupt files yield an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "alert state unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "alert state unreadable, starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), keys = entries.len(), "alert state loaded");
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&AlertEntry> {
        self.entries.get(key)
    }

    pub fn status(&self, key: &str) -> AlertStatus {
        self.entries.get(key).map(|e| e.status).unwrap_or_default()
    }

    pub fn entries(&self) -> &BTreeMap<String, AlertEntry> {
        &self.entries
    }

    /// Feed one observation for `key` and report the effective status.
    ///
    /// `Unknown` leaves the counters untouched. `Degraded` counts as a
    /// failure; a key that starts alerting on a degraded result reports
    /// `degraded` until a hard failure escalates it to `inactive`.
    pub fn evaluate(&mut self, key: &str, outcome: &ProbeOutcome, thresholds: Thresholds) -> Evaluation {
        let entry = self.entries.entry(key.to_string()).or_default();
        let before = entry.status;

        match outcome {
            ProbeOutcome::Unknown(reason) => {
                debug!(key, reason = %reason, "indeterminate result ignored");
                return Evaluation {
                    status: before,
                    transition: None,
                };
            }
            ProbeOutcome::Ok(_) => {
                entry.success_count = entry.success_count.saturating_add(1);
                entry.fail_count = 0;
                if before.is_alerting() && entry.success_count >= thresholds.successes_to_clear {
                    entry.status = AlertStatus::Ok;
                }
            }
            ProbeOutcome::Degraded(_) | ProbeOutcome::Fail(_) => {
                entry.fail_count = entry.fail_count.saturating_add(1);
                entry.success_count = 0;
                let hard = matches!(outcome, ProbeOutcome::Fail(_));
                match before {
                    AlertStatus::Ok if entry.fail_count >= thresholds.fails_for_alert => {
                        entry.status = if hard {
                            AlertStatus::Inactive
                        } else {
                            AlertStatus::Degraded
                        };
                    }
                    AlertStatus::Degraded if hard => entry.status = AlertStatus::Inactive,
                    _ => {}
                }
            }
        }

        let after = entry.status;
        let transition = (after != before).then_some(Transition {
            from: before,
            to: after,
        });
        if let Some(t) = transition {
            info!(key, from = %t.from, to = %t.to, "alert transition");
        }
        Evaluation {
            status: after,
            transition,
        }
    }

    /// True when no trigger is recorded for `key` or at least `cooldown` has
    /// passed since it.
    pub fn cooldown_elapsed(&self, key: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.entries.get(key).and_then(|e| e.last_triggered) else {
            return true;
        };
        let cooldown = chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::days(36_500));
        now - last >= cooldown
    }

    pub fn mark_triggered(&mut self, key: &str, now: DateTime<Utc>) {
        self.entries.entry(key.to_string()).or_default().last_triggered = Some(now);
    }

    /// Persist atomically; failures are logged and the in-memory state stays authoritative.
    pub async fn save(&self) {
        if let Err(e) = self.try_save().await {
            warn!(path = %self.path.display(), error = %e, "alert state not saved");
        }
    }

    pub async fn try_save(&self) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(&self.path, &body).await
    }
}
