//! Single repairs and status output

use anyhow::Result;

use crate::config::AppConfig;
use crate::persistence::{AlertStateStore, SnapshotLog};
use crate::services::Services;
use crate::supervisor::{RepairAction, RepairOutcome, Repairer};

async fn run_single(config: &AppConfig, services: &Services, action: RepairAction, apply: bool) -> i32 {
    let outcome = Repairer::new(config, services, apply).run(&action).await;
    println!("[{}] {}", action.code(), outcome);
    match outcome {
        RepairOutcome::Failed(_) => 1,
        _ => 0,
    }
}

/// Reverse-proxy config present and accepted by nginx
pub async fn proxy_conf(config: &AppConfig, services: &Services, apply: bool) -> Result<i32> {
    Ok(run_single(config, services, RepairAction::WriteProxyConfig, apply).await)
}

/// DDNS record matches the public IP
pub async fn ddns(config: &AppConfig, services: &Services, apply: bool, force: bool) -> Result<i32> {
    Ok(run_single(config, services, RepairAction::UpdateDns { force }, apply).await)
}

pub async fn status(config: &AppConfig) -> Result<i32> {
    let log = SnapshotLog::new(
        config.monitor.snapshot_path.clone(),
        config.monitor.snapshot_retention,
    );
    match log.latest().await {
        Some(snap) => {
            println!("\x1b[36mLatest snapshot\x1b[0m ({})", log.path().display());
            println!("{}", serde_json::to_string_pretty(&snap)?);
        }
        None => println!("No snapshot recorded at {}", log.path().display()),
    }

    let store = AlertStateStore::load(&config.monitor.alert_state_path).await;
    println!("\n\x1b[36mAlert state\x1b[0m ({})", store.path().display());
    if store.entries().is_empty() {
        println!("  (empty)");
    }
    for (key, entry) in store.entries() {
        let marker = if entry.status.is_alerting() {
            "\x1b[31m\u{25cf}\x1b[0m"
        } else {
            "\x1b[32m\u{25cf}\x1b[0m"
        };
        print!(
            "  {} {:<20} {:<9} fails={} successes={}",
            marker, key, entry.status, entry.fail_count, entry.success_count
        );
        match entry.last_triggered {
            Some(at) => println!(" last_triggered={}", at.to_rfc3339()),
            None => println!(),
        }
    }
    Ok(0)
}
