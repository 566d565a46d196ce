//! Repair actions
//!
//! Each action is bound to one failure code and is idempotent, container
//! restarts excepted. Nothing changes unless the caller opted into `apply`;
//! otherwise the intended change is logged and announced as a preview.
//! Config rewrites always leave a timestamped backup next to the file.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::adapters::CoreConf;
use crate::config::AppConfig;
use crate::domain::FailureCode;
use crate::error::{Result, WatchError};
use crate::persistence::write_atomic;
use crate::probes;
use crate::services::Services;

/// Bounded recovery procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairAction {
    /// Log and notify; the condition needs a human
    NotifyOnly { code: FailureCode },
    RestartContainer { code: FailureCode, container: String },
    /// Point Deluge's interfaces at the tunnel address, or restart it when
    /// already bound but offline
    RebindDeluge,
    /// Generate the reverse-proxy site config when it is missing
    WriteProxyConfig,
    /// Push the public IP to the dynamic DNS provider
    UpdateDns { force: bool },
}

impl RepairAction {
    pub fn code(&self) -> FailureCode {
        match self {
            RepairAction::NotifyOnly { code } | RepairAction::RestartContainer { code, .. } => *code,
            RepairAction::RebindDeluge => FailureCode::D004,
            RepairAction::WriteProxyConfig => FailureCode::ConfPresent,
            RepairAction::UpdateDns { .. } => FailureCode::DnsMatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Applied(String),
    NoChange(String),
    /// What would have happened with `apply`
    Preview(String),
    NotifyOnly,
    Failed(String),
}

impl RepairOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RepairOutcome::Failed(_))
    }
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairOutcome::Applied(what) => write!(f, "applied: {}", what),
            RepairOutcome::NoChange(why) => write!(f, "no change: {}", why),
            RepairOutcome::Preview(what) => write!(f, "dry run: would {}", what),
            RepairOutcome::NotifyOnly => write!(f, "notified"),
            RepairOutcome::Failed(why) => write!(f, "failed: {}", why),
        }
    }
}

/// Runs repair actions against the live collaborators
pub struct Repairer<'a> {
    config: &'a AppConfig,
    services: &'a Services,
    apply: bool,
}

impl<'a> Repairer<'a> {
    pub fn new(config: &'a AppConfig, services: &'a Services, apply: bool) -> Self {
        Self {
            config,
            services,
            apply,
        }
    }

    /// Run `action` and mirror the outcome to the notifier
    pub async fn run(&self, action: &RepairAction) -> RepairOutcome {
        let code = action.code();
        info!(code = %code, ?action, apply = self.apply, "repair");

        let outcome = match action {
            RepairAction::NotifyOnly { .. } => RepairOutcome::NotifyOnly,
            RepairAction::RestartContainer { container, .. } => self.restart(container).await,
            RepairAction::RebindDeluge => self.rebind_deluge().await,
            RepairAction::WriteProxyConfig => self.ensure_proxy_config().await,
            RepairAction::UpdateDns { force } => self.update_dns(*force).await,
        };

        match &outcome {
            RepairOutcome::Applied(what) => {
                info!(code = %code, "{}", what);
                self.notify(&format!("\u{1f527} [{}] {}", code, what)).await;
            }
            RepairOutcome::Preview(what) => {
                info!(code = %code, "preview: {}", what);
                self.notify(&format!("\u{1f50d} [{}] dry run: would {}", code, what))
                    .await;
            }
            RepairOutcome::Failed(reason) => {
                error!(code = %code, reason = %reason, "repair failed");
                self.notify(&format!("\u{274c} [{}] repair failed: {}", code, reason))
                    .await;
            }
            RepairOutcome::NoChange(why) => debug!(code = %code, "no change: {}", why),
            RepairOutcome::NotifyOnly => debug!(code = %code, "no automatic repair"),
        }
        outcome
    }

    async fn notify(&self, text: &str) {
        self.services.notifier.send(text).await;
    }

    async fn restart(&self, container: &str) -> RepairOutcome {
        if !self.apply {
            return RepairOutcome::Preview(format!("restart container {}", container));
        }
        match self.services.containers.restart(container).await {
            Ok(()) => RepairOutcome::Applied(format!("restarted container {}", container)),
            Err(e) => RepairOutcome::Failed(format!("restart {}: {}", container, e)),
        }
    }

    async fn rebind_deluge(&self) -> RepairOutcome {
        let names = &self.config.containers;
        let path = &self.config.deluge.core_conf_path;

        let Some(tunnel) = probes::interface_ip(
            self.services.containers.as_ref(),
            &names.vpn,
            &self.config.vpn.tunnel_interface,
        )
        .await
        else {
            return RepairOutcome::Failed("tunnel address unknown".to_string());
        };

        let conf = match CoreConf::load(path).await {
            Ok(conf) => conf,
            Err(e) => return RepairOutcome::Failed(format!("{}: {}", path.display(), e)),
        };

        if conf.is_bound_to(&tunnel) {
            let online = probes::egress_ip(
                self.services.containers.as_ref(),
                &names.deluge,
                &self.config.deluge.connectivity_url,
                self.config.monitor.probe_timeout(),
            )
            .await
            .is_some();
            if online {
                return RepairOutcome::NoChange(format!("already bound to {}", tunnel));
            }
            return self.restart(&names.deluge).await;
        }

        let from = conf.listen_interface().unwrap_or("<unset>").to_string();
        if !self.apply {
            return RepairOutcome::Preview(format!("rebind deluge from {} to {}", from, tunnel));
        }

        if let Err(e) = self.services.containers.stop(&names.deluge).await {
            return RepairOutcome::Failed(format!("stop {}: {}", names.deluge, e));
        }
        let rewrite = rewrite_core_conf(path, &tunnel).await;
        // Bring the daemon back whatever happened to the file
        let started = self.services.containers.start(&names.deluge).await;

        match (rewrite, started) {
            (Ok(backup), Ok(())) => RepairOutcome::Applied(format!(
                "rebound deluge from {} to {} (backup {})",
                from,
                tunnel,
                backup.display()
            )),
            (Err(e), _) => RepairOutcome::Failed(format!("rewrite {}: {}", path.display(), e)),
            (Ok(_), Err(e)) => RepairOutcome::Failed(format!("start {}: {}", names.deluge, e)),
        }
    }

    async fn ensure_proxy_config(&self) -> RepairOutcome {
        let path = &self.config.proxy.config_path;
        let nginx = &self.config.containers.nginx;

        if tokio::fs::metadata(path).await.is_ok() {
            return match nginx_test(self.services, nginx).await {
                Ok(()) => RepairOutcome::NoChange(format!("{} present and valid", path.display())),
                Err(e) => RepairOutcome::Failed(format!(
                    "{} present but rejected: {}",
                    path.display(),
                    e
                )),
            };
        }

        let server_name = self
            .config
            .proxy
            .server_name
            .clone()
            .or_else(|| self.config.dns.domain.clone())
            .unwrap_or_else(|| "_".to_string());
        if !self.apply {
            return RepairOutcome::Preview(format!(
                "write {} for {} -> {}",
                path.display(),
                server_name,
                self.config.proxy.upstream
            ));
        }

        let body = render_proxy_config(&server_name, &self.config.proxy.upstream);
        if let Err(e) = write_atomic(path, body.as_bytes()).await {
            return RepairOutcome::Failed(format!("write {}: {}", path.display(), e));
        }
        if let Err(e) = nginx_test(self.services, nginx).await {
            return RepairOutcome::Failed(format!("generated config rejected: {}", e));
        }
        match self
            .services
            .containers
            .exec(nginx, &["nginx", "-s", "reload"])
            .await
        {
            Ok(out) if out.success() => {
                RepairOutcome::Applied(format!("wrote {} and reloaded nginx", path.display()))
            }
            Ok(out) => RepairOutcome::Failed(format!("nginx reload: {}", out.stderr)),
            Err(e) => RepairOutcome::Failed(format!("nginx reload: {}", e)),
        }
    }

    async fn update_dns(&self, force: bool) -> RepairOutcome {
        let dns = &self.config.dns;
        let Some(domain) = dns.domain.as_deref() else {
            return RepairOutcome::Failed("dns.domain is not configured".to_string());
        };
        let Some(public) = probes::public_ip(self.services.public_ip.as_ref()).await else {
            return RepairOutcome::Failed("public IP unknown".to_string());
        };

        if !force {
            match self.services.resolver.resolve_a(domain).await {
                Ok(addrs) if addrs.contains(&public) => {
                    return RepairOutcome::NoChange(format!("{} already points at {}", domain, public));
                }
                Ok(_) => {}
                Err(e) => warn!(domain, error = %e, "resolution failed, updating anyway"),
            }
        }

        if !self.apply {
            return RepairOutcome::Preview(format!("point {} at {}", dns.subdomain, public));
        }
        match self
            .services
            .dns
            .update(&dns.subdomain, &dns.token, &public.to_string())
            .await
        {
            Ok(reply) => RepairOutcome::Applied(format!(
                "pointed {} at {} ({})",
                dns.subdomain, public, reply
            )),
            Err(e) => RepairOutcome::Failed(format!("dns update: {}", e)),
        }
    }
}

/// Back up `path`, bind both interfaces to `ip` and replace the file.
/// Re-reads the file first since Deluge rewrites it on shutdown.
pub async fn rewrite_core_conf(path: &Path, ip: &str) -> Result<PathBuf> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut conf = CoreConf::parse(&raw)?;
    conf.bind_to(ip);

    let backup = backup_path(path);
    tokio::fs::write(&backup, raw.as_bytes()).await?;
    write_atomic(path, conf.render()?.as_bytes()).await?;
    Ok(backup)
}

/// `<file>.bak-YYYYmmddTHHMMSSZ`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak-{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
    PathBuf::from(name)
}

async fn nginx_test(services: &Services, nginx: &str) -> Result<()> {
    let out = services.containers.exec(nginx, &["nginx", "-t"]).await?;
    if out.success() {
        Ok(())
    } else {
        Err(WatchError::container(nginx, out.stderr))
    }
}

/// Minimal reverse-proxy site for the media server
pub fn render_proxy_config(server_name: &str, upstream: &str) -> String {
    format!(
        r#"# Generated by mediawatch
server {{
    listen 80;
    listen [::]:80;
    server_name {server_name};

    client_max_body_size 100M;

    location / {{
        proxy_pass {upstream};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_buffering off;
        proxy_read_timeout 3600s;
    }}
}}
"#
    )
}
