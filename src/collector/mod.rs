//! Quick-check sweep
//!
//! Probes every collaborator once and reduces the results to a
//! [`HealthSnapshot`]. Nothing here fails: unreachable systems show up as
//! `false`/`None` fields in the record.

mod system;

pub use system::SystemSampler;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::domain::HealthSnapshot;
use crate::probes;
use crate::services::Services;

/// Upper bound for one speedtest run
const SPEEDTEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Collector {
    system: SystemSampler,
    cycles: u64,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        Self {
            system: SystemSampler::new(),
            cycles: 0,
        }
    }

    pub async fn collect(
        &mut self,
        config: &AppConfig,
        services: &Services,
        now: DateTime<Utc>,
    ) -> HealthSnapshot {
        self.cycles += 1;
        let mut snap = HealthSnapshot::new(now);
        let names = &config.containers;

        for name in names.core() {
            let outcome = probes::container_running(services.containers.as_ref(), &name).await;
            snap.containers.insert(name, outcome.is_ok());
        }

        let probe_timeout = config.monitor.probe_timeout();
        let echo_url = &config.deluge.connectivity_url;

        if snap.container_running(&names.vpn) == Some(true) {
            snap.network.vpn_internal_ip = probes::interface_ip(
                services.containers.as_ref(),
                &names.vpn,
                &config.vpn.tunnel_interface,
            )
            .await;
            snap.network.vpn_public_ip =
                probes::egress_ip(services.containers.as_ref(), &names.vpn, echo_url, probe_timeout)
                    .await
                    .map(|ip| ip.to_string());
        }

        if snap.container_running(&names.deluge) == Some(true) {
            snap.network.deluge_internal_ip =
                probes::container_ip(services.containers.as_ref(), &names.deluge).await;
            let egress = probes::egress_ip(
                services.containers.as_ref(),
                &names.deluge,
                echo_url,
                probe_timeout,
            )
            .await;
            snap.network.internet_access = egress.is_some();
            snap.network.deluge_public_ip = egress.map(|ip| ip.to_string());

            match services.torrent.connect().await {
                Ok(()) => match services.torrent.session_summary().await {
                    Ok(summary) => {
                        snap.deluge.reachable = true;
                        snap.deluge.downloading = summary.downloading;
                        snap.deluge.seeding = summary.seeding;
                        snap.deluge.download_rate = summary.download_rate;
                        snap.deluge.upload_rate = summary.upload_rate;
                    }
                    Err(e) => warn!(error = %e, "torrent summary failed"),
                },
                Err(e) => warn!(error = %e, "torrent rpc unreachable"),
            }
        }

        if config.monitor.speedtest_every > 0 && self.cycles % config.monitor.speedtest_every == 0 {
            if let Some((down, up)) = run_speedtest(&config.monitor.speedtest_command).await {
                snap.network.speedtest_download_mbps = Some(down);
                snap.network.speedtest_upload_mbps = Some(up);
            }
        }

        snap.plex.local_accessible = probes::media_server_ok(services.plex.as_ref()).await.is_ok();
        if snap.plex.local_accessible {
            match services.plex.sessions().await {
                Ok(sessions) => {
                    snap.plex.active_sessions = sessions.active_sessions;
                    snap.plex.unique_clients = sessions.unique_clients;
                    snap.plex.transcoding = sessions.transcoding;
                }
                Err(e) => warn!(error = %e, "plex sessions unavailable"),
            }
        }
        if let Some(remote) = &services.plex_remote {
            snap.plex.external_accessible =
                Some(probes::http_ok(remote.as_ref(), &[200]).await.is_ok());
        }

        snap.system = self.system.sample();
        snap.storage = self.system.storage();

        info!(
            stopped = ?snap.stopped_containers(),
            plex_local = snap.plex.local_accessible,
            plex_external = ?snap.plex.external_accessible,
            internet = snap.network.internet_access,
            behind_vpn = ?snap.network.deluge_behind_vpn(),
            cpu = snap.system.cpu_percent,
            "quick check"
        );
        snap
    }
}

/// Run the configured speedtest command; returns (download, upload) in Mbit/s.
async fn run_speedtest(command: &[String]) -> Option<(f64, f64)> {
    let (program, args) = command.split_first()?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => {
            warn!(program, error = %e, "speedtest not available");
            return None;
        }
    };

    let output = match tokio::time::timeout(SPEEDTEST_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            warn!(code = ?output.status.code(), "speedtest failed");
            return None;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "speedtest failed");
            return None;
        }
        Err(_) => {
            warn!(secs = SPEEDTEST_TIMEOUT.as_secs(), "speedtest timed out");
            return None;
        }
    };

    let parsed = parse_speedtest(&String::from_utf8_lossy(&output.stdout));
    debug!(result = ?parsed, "speedtest");
    parsed
}

/// Ookla CLI JSON: `bandwidth` is in bytes per second
pub fn parse_speedtest(raw: &str) -> Option<(f64, f64)> {
    let json: Value = serde_json::from_str(raw.trim()).ok()?;
    let mbps = |key: &str| {
        json.get(key)?
            .get("bandwidth")?
            .as_f64()
            .map(|bytes| (bytes * 8.0 / 1_000_000.0 * 100.0).round() / 100.0)
    };
    Some((mbps("download")?, mbps("upload")?))
}
