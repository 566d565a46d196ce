//! Severity tier definitions
//!
//! Steps are ordered by dependency: a container is checked before the service
//! inside it, the VPN before the client routed through it.

use chrono::Utc;
use tracing::debug;

use super::repair::RepairAction;
use crate::adapters::CoreConf;
use crate::config::AppConfig;
use crate::domain::{FailureCode, Severity};
use crate::probes::{self, ProbeOutcome};
use crate::services::Services;

/// What a step looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    ContainerRunning(String),
    PlexLocal,
    PlexRemote,
    DnsRecord,
    Certificate,
    ProxyConfig,
    TorrentRpc,
    /// Deluge bound to the tunnel address and able to reach the internet
    DelugeBinding,
    Radarr,
    Sonarr,
    CoreContainers,
}

/// One step of a diagnostic sequence
#[derive(Debug, Clone)]
pub struct DiagnosticStep {
    pub name: &'static str,
    pub code: FailureCode,
    /// A failure aborts the rest of the tier
    pub terminal: bool,
    pub check: Check,
    pub repair: Option<RepairAction>,
}

impl DiagnosticStep {
    fn new(name: &'static str, code: FailureCode, terminal: bool, check: Check) -> Self {
        Self {
            name,
            code,
            terminal,
            check,
            repair: None,
        }
    }

    fn repair(mut self, action: RepairAction) -> Self {
        self.repair = Some(action);
        self
    }
}

/// Fresh step list for `severity`
pub fn steps(severity: Severity, config: &AppConfig) -> Vec<DiagnosticStep> {
    let names = &config.containers;
    match severity {
        Severity::Sev0 => vec![
            DiagnosticStep::new("plex_container", FailureCode::P001, true, Check::ContainerRunning(names.plex.clone()))
                .repair(RepairAction::RestartContainer {
                    code: FailureCode::P001,
                    container: names.plex.clone(),
                }),
            DiagnosticStep::new("plex_local", FailureCode::P002, true, Check::PlexLocal).repair(
                RepairAction::RestartContainer {
                    code: FailureCode::P002,
                    container: names.plex.clone(),
                },
            ),
            DiagnosticStep::new("dns_record", FailureCode::P003, false, Check::DnsRecord)
                .repair(RepairAction::UpdateDns { force: false }),
            DiagnosticStep::new("certificate", FailureCode::P004, false, Check::Certificate)
                .repair(RepairAction::NotifyOnly {
                    code: FailureCode::P004,
                }),
            DiagnosticStep::new("plex_remote", FailureCode::P005, false, Check::PlexRemote)
                .repair(RepairAction::NotifyOnly {
                    code: FailureCode::P005,
                }),
            DiagnosticStep::new("proxy_config", FailureCode::P006, true, Check::ProxyConfig)
                .repair(RepairAction::WriteProxyConfig),
        ],
        Severity::Sev1 => vec![
            DiagnosticStep::new("vpn_container", FailureCode::D001, true, Check::ContainerRunning(names.vpn.clone()))
                .repair(RepairAction::NotifyOnly {
                    code: FailureCode::D001,
                }),
            DiagnosticStep::new("deluge_container", FailureCode::D002, true, Check::ContainerRunning(names.deluge.clone()))
                .repair(RepairAction::NotifyOnly {
                    code: FailureCode::D002,
                }),
            DiagnosticStep::new("deluge_rpc", FailureCode::D003, true, Check::TorrentRpc).repair(
                RepairAction::RestartContainer {
                    code: FailureCode::D003,
                    container: names.deluge.clone(),
                },
            ),
            DiagnosticStep::new("deluge_binding", FailureCode::D004, true, Check::DelugeBinding)
                .repair(RepairAction::RebindDeluge),
        ],
        Severity::Sev2 => vec![
            DiagnosticStep::new("radarr", FailureCode::A001, false, Check::Radarr).repair(
                RepairAction::RestartContainer {
                    code: FailureCode::A001,
                    container: names.radarr.clone(),
                },
            ),
            DiagnosticStep::new("sonarr", FailureCode::A002, false, Check::Sonarr).repair(
                RepairAction::RestartContainer {
                    code: FailureCode::A002,
                    container: names.sonarr.clone(),
                },
            ),
        ],
        Severity::Sev3 => vec![DiagnosticStep::new(
            "core_containers",
            FailureCode::C001,
            true,
            Check::CoreContainers,
        )
        .repair(RepairAction::NotifyOnly {
            code: FailureCode::C001,
        })],
    }
}

fn skipped(what: &str) -> ProbeOutcome {
    ProbeOutcome::ok_with(format!("skipped: no {} configured", what))
}

/// Status set treated as "up" for an *arr instance; without a key a 401 still proves it answers
fn arr_expected(api_key: &str) -> &'static [u16] {
    if api_key.is_empty() {
        &[200, 401]
    } else {
        &[200]
    }
}

/// Host part of the public URL, falling back to the DNS name
fn public_host(config: &AppConfig) -> Option<(String, u16)> {
    if let Some(url) = config
        .plex
        .public_url
        .as_deref()
        .and_then(|u| url::Url::parse(u).ok())
    {
        if let Some(host) = url.host_str() {
            return Some((host.to_string(), url.port_or_known_default().unwrap_or(443)));
        }
    }
    config.dns.domain.clone().map(|d| (d, 443))
}

impl Check {
    pub async fn run(&self, config: &AppConfig, services: &Services) -> ProbeOutcome {
        let containers = services.containers.as_ref();
        match self {
            Check::ContainerRunning(name) => probes::container_running(containers, name).await,
            Check::PlexLocal => probes::media_server_ok(services.plex.as_ref()).await,
            Check::PlexRemote => match &services.plex_remote {
                Some(remote) => probes::http_ok(remote.as_ref(), &[200]).await,
                None => skipped("public URL"),
            },
            Check::DnsRecord => match config.dns.domain.as_deref() {
                Some(domain) => {
                    probes::dns_matches_public_ip(
                        services.resolver.as_ref(),
                        services.public_ip.as_ref(),
                        domain,
                    )
                    .await
                }
                None => skipped("domain"),
            },
            Check::Certificate => match public_host(config) {
                Some((host, port)) => {
                    probes::cert_valid(
                        services.certs.as_ref(),
                        &host,
                        port,
                        config.dns.cert_warn_days,
                        Utc::now(),
                    )
                    .await
                    .outcome
                }
                None => skipped("public host"),
            },
            Check::ProxyConfig => {
                let path = &config.proxy.config_path;
                if tokio::fs::metadata(path).await.is_err() {
                    return ProbeOutcome::fail(format!("{} is missing", path.display()));
                }
                match containers
                    .exec(&config.containers.nginx, &["nginx", "-t"])
                    .await
                {
                    Ok(out) if out.success() => ProbeOutcome::ok(),
                    Ok(out) => ProbeOutcome::fail(format!("nginx -t: {}", out.stderr)),
                    Err(e) => ProbeOutcome::from_error(&e),
                }
            }
            Check::TorrentRpc => {
                probes::rpc_reachable(services.torrent.as_ref(), config.deluge.timeout()).await
            }
            Check::DelugeBinding => deluge_binding(config, services).await,
            Check::Radarr => {
                probes::http_ok(services.radarr.as_ref(), arr_expected(&config.arr.radarr_api_key))
                    .await
            }
            Check::Sonarr => {
                probes::http_ok(services.sonarr.as_ref(), arr_expected(&config.arr.sonarr_api_key))
                    .await
            }
            Check::CoreContainers => {
                let mut down = Vec::new();
                let mut unknown = Vec::new();
                for name in config.containers.core() {
                    match probes::container_running(containers, &name).await {
                        ProbeOutcome::Ok(_) => {}
                        ProbeOutcome::Unknown(_) => unknown.push(name),
                        _ => down.push(name),
                    }
                }
                if !down.is_empty() {
                    ProbeOutcome::fail(format!("not running: {}", down.join(", ")))
                } else if !unknown.is_empty() {
                    ProbeOutcome::Unknown(format!("could not inspect: {}", unknown.join(", ")))
                } else {
                    ProbeOutcome::ok()
                }
            }
        }
    }
}

async fn deluge_binding(config: &AppConfig, services: &Services) -> ProbeOutcome {
    let containers = services.containers.as_ref();
    let tunnel = probes::interface_ip(
        containers,
        &config.containers.vpn,
        &config.vpn.tunnel_interface,
    )
    .await;

    let conf = match CoreConf::load(&config.deluge.core_conf_path).await {
        Ok(conf) => conf,
        Err(e) => {
            return ProbeOutcome::Unknown(format!(
                "{} unreadable: {}",
                config.deluge.core_conf_path.display(),
                e
            ))
        }
    };

    for configured in [conf.listen_interface(), conf.outgoing_interface()] {
        let outcome = probes::ip_binding_matches(configured, tunnel.as_deref());
        if !outcome.is_ok() {
            return outcome;
        }
    }

    match probes::egress_ip(
        containers,
        &config.containers.deluge,
        &config.deluge.connectivity_url,
        config.monitor.probe_timeout(),
    )
    .await
    {
        Some(ip) => {
            debug!(%ip, "deluge egress");
            ProbeOutcome::ok_with(ip.to_string())
        }
        None => ProbeOutcome::fail("deluge has no internet access"),
    }
}
