//! Service probes
//!
//! Every probe answers with a [`ProbeOutcome`] and never returns an error to
//! its caller: timeouts, subprocess failures and malformed replies become
//! `Fail`, and a probe that could not run at all becomes `Unknown`. Probes
//! only read; they never change the probed system.

use chrono::{DateTime, Utc};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::adapters::docker::parse_ipv4_from_ip_addr;
use crate::adapters::{
    CertificateSource, ContainerControl, MediaServer, NameResolver, PublicIpSource,
    StatusEndpoint, TorrentRpc,
};
use crate::error::WatchError;

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Healthy, with an optional payload (IP, status code, days left)
    Ok(Option<String>),
    /// Working but impaired
    Degraded(String),
    Fail(String),
    /// The condition could not be determined
    Unknown(String),
}

impl ProbeOutcome {
    pub fn ok() -> Self {
        ProbeOutcome::Ok(None)
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        ProbeOutcome::Ok(Some(detail.into()))
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        ProbeOutcome::Fail(reason.into())
    }

    pub fn from_bool(ok: bool, reason: impl Into<String>) -> Self {
        if ok {
            Self::ok()
        } else {
            Self::fail(reason)
        }
    }

    /// Map a collaborator error; errors that mean "could not look" become Unknown
    pub fn from_error(err: &WatchError) -> Self {
        if err.is_indeterminate() {
            ProbeOutcome::Unknown(err.to_string())
        } else {
            ProbeOutcome::Fail(err.to_string())
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok(_))
    }

    /// Passing for sequencing purposes (healthy or merely impaired)
    pub fn is_passing(&self) -> bool {
        matches!(self, ProbeOutcome::Ok(_) | ProbeOutcome::Degraded(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ProbeOutcome::Unknown(_))
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Ok(detail) => detail.as_deref(),
            ProbeOutcome::Degraded(reason)
            | ProbeOutcome::Fail(reason)
            | ProbeOutcome::Unknown(reason) => Some(reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Ok(_) => "ok",
            ProbeOutcome::Degraded(_) => "degraded",
            ProbeOutcome::Fail(_) => "fail",
            ProbeOutcome::Unknown(_) => "unknown",
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{} ({})", self.label(), detail),
            None => write!(f, "{}", self.label()),
        }
    }
}

/// Ok iff the container's runtime state is "running"
pub async fn container_running(containers: &dyn ContainerControl, name: &str) -> ProbeOutcome {
    match containers.is_running(name).await {
        Ok(true) => ProbeOutcome::ok(),
        Ok(false) => ProbeOutcome::fail(format!("container {} is not running", name)),
        Err(e) => {
            warn!(container = name, error = %e, "container inspection failed");
            ProbeOutcome::from_error(&e)
        }
    }
}

/// Ok iff the torrent daemon handshake completes within `limit`
pub async fn rpc_reachable(rpc: &dyn TorrentRpc, limit: Duration) -> ProbeOutcome {
    match timeout(limit, rpc.connect()).await {
        Ok(Ok(())) => ProbeOutcome::ok(),
        Ok(Err(e)) => {
            warn!(error = %e, "torrent rpc handshake failed");
            ProbeOutcome::from_error(&e)
        }
        Err(_) => ProbeOutcome::fail(format!("rpc handshake timed out after {}s", limit.as_secs())),
    }
}

/// Ok iff the endpoint answers with one of `expected`; the payload is the status code
pub async fn http_ok(endpoint: &dyn StatusEndpoint, expected: &[u16]) -> ProbeOutcome {
    match endpoint.status_code().await {
        Ok(code) if expected.contains(&code) => ProbeOutcome::ok_with(code.to_string()),
        Ok(code) => {
            debug!(endpoint = endpoint.name(), code, "unexpected status");
            ProbeOutcome::fail(format!("{} answered HTTP {}", endpoint.name(), code))
        }
        Err(e) => {
            warn!(endpoint = endpoint.name(), error = %e, "http probe failed");
            ProbeOutcome::from_error(&e)
        }
    }
}

/// Ok iff the media server's identity endpoint answers 200
pub async fn media_server_ok(server: &dyn MediaServer) -> ProbeOutcome {
    match server.identity().await {
        Ok(()) => ProbeOutcome::ok_with("200"),
        Err(e) => {
            warn!(error = %e, "media server identity failed");
            ProbeOutcome::from_error(&e)
        }
    }
}

/// Ok iff the configured bind address is exactly the tunnel address
pub fn ip_binding_matches(configured: Option<&str>, tunnel: Option<&str>) -> ProbeOutcome {
    match (configured, tunnel) {
        (_, None) => ProbeOutcome::Unknown("tunnel address unknown".to_string()),
        (None, Some(_)) => ProbeOutcome::fail("no bind address configured"),
        (Some(c), Some(t)) if c == t => ProbeOutcome::ok_with(t),
        (Some(c), Some(t)) => ProbeOutcome::fail(format!("bound to {}, tunnel is {}", c, t)),
    }
}

/// Certificate check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertCheck {
    /// False when expired, unverifiable or unreadable
    pub valid: bool,
    pub days_remaining: Option<i64>,
    pub outcome: ProbeOutcome,
}

pub async fn cert_valid(
    certs: &dyn CertificateSource,
    host: &str,
    port: u16,
    warn_days: i64,
    now: DateTime<Utc>,
) -> CertCheck {
    let info = match certs.inspect(host, port).await {
        Ok(info) => info,
        Err(e) => {
            warn!(host, error = %e, "certificate unreadable");
            return CertCheck {
                valid: false,
                days_remaining: None,
                outcome: ProbeOutcome::fail(format!("certificate unreadable: {}", e)),
            };
        }
    };

    let days = info.days_remaining(now);
    let valid = info.verified && info.not_after > now;
    let outcome = if !valid {
        ProbeOutcome::fail(if info.verified {
            format!("certificate expired {}", info.not_after.format("%Y-%m-%d"))
        } else {
            "certificate failed verification".to_string()
        })
    } else if days < warn_days {
        ProbeOutcome::Degraded(format!("certificate expires in {} days", days))
    } else {
        ProbeOutcome::ok_with(format!("{} days", days))
    };

    CertCheck {
        valid,
        days_remaining: Some(days),
        outcome,
    }
}

/// Ok iff `domain` resolves to the current public IPv4
pub async fn dns_matches_public_ip(
    resolver: &dyn NameResolver,
    public_ip: &dyn PublicIpSource,
    domain: &str,
) -> ProbeOutcome {
    let current = match public_ip.public_ipv4().await {
        Ok(ip) => ip,
        Err(e) => {
            warn!(error = %e, "public IP lookup failed");
            return ProbeOutcome::Unknown(format!("public IP unknown: {}", e));
        }
    };

    match resolver.resolve_a(domain).await {
        Ok(addrs) if addrs.contains(&current) => ProbeOutcome::ok_with(current.to_string()),
        Ok(addrs) if addrs.is_empty() => {
            ProbeOutcome::fail(format!("{} has no A record (public IP {})", domain, current))
        }
        Ok(addrs) => ProbeOutcome::fail(format!(
            "{} resolves to {}, public IP is {}",
            domain,
            join_ips(&addrs),
            current
        )),
        Err(e) => {
            warn!(domain, error = %e, "dns resolution failed");
            ProbeOutcome::fail(format!("{} did not resolve: {}", domain, e))
        }
    }
}

fn join_ips(addrs: &[Ipv4Addr]) -> String {
    addrs
        .iter()
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Address of `interface` inside a container
pub async fn interface_ip(
    containers: &dyn ContainerControl,
    container: &str,
    interface: &str,
) -> Option<String> {
    match containers
        .exec(container, &["ip", "-4", "-o", "addr", "show", "dev", interface])
        .await
    {
        Ok(out) if out.success() => parse_ipv4_from_ip_addr(&out.stdout),
        Ok(out) => {
            debug!(container, interface, stderr = %out.stderr, "no address");
            None
        }
        Err(e) => {
            warn!(container, interface, error = %e, "address lookup failed");
            None
        }
    }
}

/// First IPv4 the container reports for itself
pub async fn container_ip(containers: &dyn ContainerControl, container: &str) -> Option<String> {
    match containers.exec(container, &["hostname", "-i"]).await {
        Ok(out) if out.success() => out
            .stdout
            .split_whitespace()
            .find_map(|tok| tok.parse::<Ipv4Addr>().ok())
            .map(|ip| ip.to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(container, error = %e, "hostname lookup failed");
            None
        }
    }
}

/// Public IPv4 as seen from inside a container, fetched with curl or wget.
/// None means the container has no working internet access.
pub async fn egress_ip(
    containers: &dyn ContainerControl,
    container: &str,
    echo_url: &str,
    limit: Duration,
) -> Option<Ipv4Addr> {
    let secs = limit.as_secs().max(1).to_string();
    let attempts: [Vec<&str>; 2] = [
        vec!["curl", "-s", "--max-time", &secs, echo_url],
        vec!["wget", "-qO-", "-T", &secs, echo_url],
    ];

    for argv in &attempts {
        match containers.exec(container, argv).await {
            Ok(out) if out.success() => {
                return out.stdout.trim().parse().ok();
            }
            // 126/127: the tool is not installed, try the next one
            Ok(out) if out.exit_code == 126 || out.exit_code == 127 => continue,
            Ok(out) => {
                debug!(container, tool = argv[0], exit_code = out.exit_code, "egress check failed");
                return None;
            }
            Err(e) => {
                warn!(container, error = %e, "egress check failed");
                return None;
            }
        }
    }
    None
}

/// Public IPv4 of this host
pub async fn public_ip(source: &dyn PublicIpSource) -> Option<Ipv4Addr> {
    match source.public_ipv4().await {
        Ok(ip) => Some(ip),
        Err(e) => {
            warn!(error = %e, "public IP lookup failed");
            None
        }
    }
}
