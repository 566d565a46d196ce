//! Dynamic DNS provider, public IP lookup and A-record resolution

use async_trait::async_trait;
use reqwest::Client;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use crate::config::DnsConfig;
use crate::error::{Result, WatchError};

/// Dynamic DNS update endpoint
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Point `subdomain` at `ip`; an empty `ip` lets the provider use the caller's address.
    /// Returns the provider's reply ("OK") or an error carrying its reply.
    async fn update(&self, subdomain: &str, token: &str, ip: &str) -> Result<String>;
}

/// Current public IPv4 of this host
#[async_trait]
pub trait PublicIpSource: Send + Sync {
    async fn public_ipv4(&self) -> Result<Ipv4Addr>;
}

/// A-record lookup
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>>;
}

/// DuckDNS-style `GET update?domains=&token=&ip=` provider
pub struct DuckDnsProvider {
    client: Client,
    update_url: String,
}

impl DuckDnsProvider {
    pub fn new(update_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            update_url: update_url.to_string(),
        })
    }
}

#[async_trait]
impl DnsProvider for DuckDnsProvider {
    async fn update(&self, subdomain: &str, token: &str, ip: &str) -> Result<String> {
        let url = url::Url::parse_with_params(
            &self.update_url,
            &[("domains", subdomain), ("token", token), ("ip", ip)],
        )
        .map_err(|e| WatchError::InvalidConfig(format!("dns.update_url: {}", e)))?;

        let body = self.client.get(url).send().await?.text().await?;
        let reply = body.trim().to_string();
        if reply.starts_with("OK") {
            Ok(reply)
        } else {
            Err(WatchError::DnsProvider(reply))
        }
    }
}

/// Plain-text IP echo service (e.g. api.ipify.org)
pub struct HttpPublicIp {
    client: Client,
    url: String,
}

impl HttpPublicIp {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl PublicIpSource for HttpPublicIp {
    async fn public_ipv4(&self) -> Result<Ipv4Addr> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        body.trim()
            .parse()
            .map_err(|_| WatchError::Malformed(format!("public IP reply '{}'", body.trim())))
    }
}

/// System resolver via the runtime's `getaddrinfo`
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn resolve_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
        let addrs = tokio::net::lookup_host((domain, 0)).await?;
        Ok(addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .collect())
    }
}

/// Queries one DNS server directly over UDP, bypassing local caches
pub struct UdpResolver {
    server: SocketAddr,
    resolver: TokioAsyncResolver,
}

impl UdpResolver {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(server, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.cache_size = 0;

        Self {
            server,
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl NameResolver for UdpResolver {
    async fn resolve_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
        match self.resolver.ipv4_lookup(domain).await {
            Ok(lookup) => {
                let addrs: Vec<Ipv4Addr> = lookup.iter().map(|a| a.0).collect();
                debug!(domain, server = %self.server, records = addrs.len(), "dns reply");
                Ok(addrs)
            }
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                debug!(domain, server = %self.server, "no A records");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Pick the resolver described by the configuration
pub fn resolver_from_config(config: &DnsConfig) -> Arc<dyn NameResolver> {
    match config.resolver.as_deref().and_then(|r| r.parse::<SocketAddr>().ok()) {
        Some(server) => Arc::new(UdpResolver::new(server, config.timeout())),
        None => Arc::new(SystemResolver),
    }
}
