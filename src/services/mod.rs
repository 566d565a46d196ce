//! Collaborator wiring
//!
//! [`Services`] bundles one handle per external system. Production code builds
//! it from [`AppConfig`]; tests assemble it from fakes.

use std::sync::Arc;
use tracing::info;

use crate::adapters::{
    dns::resolver_from_config, notifier, ArrClient, CertificateSource, ContainerControl,
    DelugeWebClient, DnsProvider, DockerCli, DuckDnsProvider, HttpEndpoint, HttpPublicIp,
    MediaServer, NameResolver, NativeTlsInspector, Notifier, PlexClient, PublicIpSource,
    StatusEndpoint, TorrentRpc,
};
use crate::config::AppConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct Services {
    pub containers: Arc<dyn ContainerControl>,
    pub torrent: Arc<dyn TorrentRpc>,
    pub plex: Arc<dyn MediaServer>,
    /// Plex identity through the public URL; None when no public URL is configured
    pub plex_remote: Option<Arc<dyn StatusEndpoint>>,
    pub radarr: Arc<dyn StatusEndpoint>,
    pub sonarr: Arc<dyn StatusEndpoint>,
    pub dns: Arc<dyn DnsProvider>,
    pub public_ip: Arc<dyn PublicIpSource>,
    pub resolver: Arc<dyn NameResolver>,
    pub certs: Arc<dyn CertificateSource>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let plex_remote = match config.plex.public_url.as_deref() {
            Some(url) if !url.is_empty() => {
                let endpoint = HttpEndpoint::new(
                    "plex_remote",
                    &format!("{}/identity", url.trim_end_matches('/')),
                    config.plex.timeout(),
                )?
                .with_header("X-Plex-Token", &config.plex.token);
                Some(Arc::new(endpoint) as Arc<dyn StatusEndpoint>)
            }
            _ => None,
        };

        let services = Self {
            containers: Arc::new(DockerCli::new("docker", config.monitor.probe_timeout() * 2)),
            torrent: Arc::new(DelugeWebClient::from_config(&config.deluge)?),
            plex: Arc::new(PlexClient::new(
                &config.plex.local_url,
                &config.plex.token,
                config.plex.timeout(),
            )?),
            plex_remote,
            radarr: Arc::new(ArrClient::new(
                "radarr",
                &config.arr.radarr_url,
                &config.arr.radarr_api_key,
                config.arr.timeout(),
            )?),
            sonarr: Arc::new(ArrClient::new(
                "sonarr",
                &config.arr.sonarr_url,
                &config.arr.sonarr_api_key,
                config.arr.timeout(),
            )?),
            dns: Arc::new(DuckDnsProvider::new(&config.dns.update_url, config.dns.timeout())?),
            public_ip: Arc::new(HttpPublicIp::new(
                &config.dns.public_ip_url,
                config.dns.timeout(),
            )?),
            resolver: resolver_from_config(&config.dns),
            certs: Arc::new(NativeTlsInspector::new(config.dns.timeout())),
            notifier: notifier::from_config(&config.notifier),
        };

        info!(
            plex = %config.plex.local_url,
            remote = services.plex_remote.is_some(),
            deluge = %format!("{}:{}", config.deluge.host, config.deluge.port),
            "collaborators ready"
        );
        Ok(services)
    }
}
