//! Persistence Layer for Monitor State
//!
//! Two single-owner JSON files, both rewritten atomically:
//! - Alert state (hysteresis counters and cooldown timestamps)
//! - Snapshot log (one HealthSnapshot per cycle)

pub mod alert_state;
pub mod snapshot_log;

pub use alert_state::{AlertStateStore, PLEX_AUTOREPAIR_KEY};
pub use snapshot_log::SnapshotLog;

use std::path::Path;

use crate::error::{Result, WatchError};

/// Replace `path` with `body` so readers see either the old or the new file.
pub async fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Err(WatchError::Internal(format!(
            "invalid state path {}",
            path.display()
        )));
    };
    if !parent.as_os_str().is_empty() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
