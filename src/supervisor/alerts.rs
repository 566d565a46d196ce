//! Alert evaluation over the latest snapshot
//!
//! Turns snapshot fields into per-key observations, feeds them through the
//! hysteresis store and notifies once per confirmed transition.

use tracing::info;

use crate::adapters::Notifier;
use crate::config::AlertConfig;
use crate::config::ContainerNames;
use crate::domain::{AlertStatus, Evaluation, HealthSnapshot, Scope};
use crate::persistence::AlertStateStore;
use crate::probes::ProbeOutcome;

pub const PLEX_LOCAL: &str = "plex_local";
pub const PLEX_EXTERNAL: &str = "plex_external";
pub const DELUGE_STATUS: &str = "deluge_status";
pub const VPN_STATUS: &str = "vpn_status";
pub const CONTAINERS: &str = "containers";
pub const STORAGE: &str = "storage";

/// One key's observation for this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub key: &'static str,
    pub label: &'static str,
    pub scope: Scope,
    pub outcome: ProbeOutcome,
}

/// Derive the per-key observations from a snapshot
pub fn observations(
    snap: &HealthSnapshot,
    names: &ContainerNames,
    disk_warn_percent: f64,
) -> Vec<Observation> {
    let mut out = Vec::new();

    out.push(Observation {
        key: PLEX_LOCAL,
        label: "Plex (local)",
        scope: Scope::Local,
        outcome: ProbeOutcome::from_bool(snap.plex.local_accessible, "local identity check failed"),
    });

    if let Some(external) = snap.plex.external_accessible {
        out.push(Observation {
            key: PLEX_EXTERNAL,
            label: "Plex (remote)",
            scope: Scope::External,
            outcome: ProbeOutcome::from_bool(external, "public URL unreachable"),
        });
    }

    let vpn = match snap.container_running(&names.vpn) {
        None => ProbeOutcome::Unknown("vpn container not inspected".into()),
        Some(false) => ProbeOutcome::fail("vpn container stopped"),
        Some(true) if snap.network.vpn_internal_ip.is_none() => {
            ProbeOutcome::fail("tunnel interface has no address")
        }
        Some(true) if snap.network.deluge_behind_vpn() == Some(false) => {
            ProbeOutcome::fail("deluge traffic bypasses the VPN")
        }
        Some(true) => ProbeOutcome::ok(),
    };
    out.push(Observation {
        key: VPN_STATUS,
        label: "VPN",
        scope: Scope::Local,
        outcome: vpn,
    });

    let deluge = match snap.container_running(&names.deluge) {
        None => ProbeOutcome::Unknown("deluge container not inspected".into()),
        Some(false) => ProbeOutcome::fail("deluge container stopped"),
        Some(true) if !snap.deluge.reachable => ProbeOutcome::fail("deluge rpc unreachable"),
        Some(true) if !snap.network.internet_access => {
            ProbeOutcome::Degraded("deluge has no internet access".into())
        }
        Some(true) => ProbeOutcome::ok(),
    };
    out.push(Observation {
        key: DELUGE_STATUS,
        label: "Deluge",
        scope: Scope::Local,
        outcome: deluge,
    });

    if !snap.containers.is_empty() {
        let stopped = snap.stopped_containers();
        out.push(Observation {
            key: CONTAINERS,
            label: "Containers",
            scope: Scope::Local,
            outcome: ProbeOutcome::from_bool(
                stopped.is_empty(),
                format!("not running: {}", stopped.join(", ")),
            ),
        });
    }

    if !snap.storage.is_empty() {
        let full: Vec<String> = snap
            .storage
            .iter()
            .filter(|(_, usage)| usage.used_percent() >= disk_warn_percent)
            .map(|(mount, usage)| format!("{} {:.0}%", mount, usage.used_percent()))
            .collect();
        out.push(Observation {
            key: STORAGE,
            label: "Storage",
            scope: Scope::Local,
            outcome: if full.is_empty() {
                ProbeOutcome::ok()
            } else {
                ProbeOutcome::Degraded(full.join(", "))
            },
        });
    }

    out
}

/// Feed the snapshot through the store and notify each transition once.
/// The caller saves the store.
pub async fn evaluate(
    store: &mut AlertStateStore,
    snap: &HealthSnapshot,
    names: &ContainerNames,
    alerts: &AlertConfig,
    notifier: &dyn Notifier,
) -> Vec<(&'static str, Evaluation)> {
    let mut results = Vec::new();
    for obs in observations(snap, names, alerts.disk_warn_percent) {
        let eval = store.evaluate(obs.key, &obs.outcome, alerts.thresholds(obs.scope));
        if let Some(t) = eval.transition {
            let text = transition_message(&obs, t.from, t.to);
            info!(key = obs.key, from = %t.from, to = %t.to, "notifying transition");
            notifier.send(&text).await;
        }
        results.push((obs.key, eval));
    }
    results
}

fn transition_message(obs: &Observation, from: AlertStatus, to: AlertStatus) -> String {
    let reason = obs.outcome.detail().unwrap_or("");
    match to {
        AlertStatus::Inactive => format!("\u{1f534} {} is DOWN: {}", obs.label, reason),
        AlertStatus::Degraded => format!("\u{1f7e1} {} is degraded: {}", obs.label, reason),
        AlertStatus::Ok => format!("\u{2705} {} recovered (was {})", obs.label, from),
    }
}
