//! In-memory collaborators for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapters::{
    CertInfo, CertificateSource, ContainerControl, DnsProvider, ExecOutput, MediaServer,
    NameResolver, Notifier, PublicIpSource, SessionSummary, StatusEndpoint, TorrentRpc,
    TorrentSummary,
};
use crate::error::{Result, WatchError};
use crate::services::Services;

#[derive(Default)]
pub struct FakeContainers {
    running: Mutex<HashMap<String, bool>>,
    inspect_errors: Mutex<HashMap<String, (bool, String)>>,
    tunnel_ips: Mutex<HashMap<String, String>>,
    scripts: Mutex<HashMap<(String, String), ExecOutput>>,
    calls: Mutex<Vec<String>>,
}

impl FakeContainers {
    pub fn with_running(names: &[&str]) -> Self {
        let fake = Self::default();
        for name in names {
            fake.set_running(name, true);
        }
        fake
    }

    pub fn set_running(&self, name: &str, running: bool) {
        self.running.lock().unwrap().insert(name.to_string(), running);
    }

    pub fn fail_inspect(&self, name: &str, err: WatchError) {
        self.inspect_errors
            .lock()
            .unwrap()
            .insert(name.to_string(), (err.is_indeterminate(), err.to_string()));
    }

    pub fn set_tunnel_ip(&self, container: &str, ip: &str) {
        self.tunnel_ips
            .lock()
            .unwrap()
            .insert(container.to_string(), ip.to_string());
    }

    /// Answer `exec(container, [program, ..])` with `output`
    pub fn script_exec(&self, container: &str, program: &str, output: ExecOutput) {
        self.scripts
            .lock()
            .unwrap()
            .insert((container.to_string(), program.to_string()), output);
    }

    pub fn set_egress_ip(&self, container: &str, ip: &str) {
        self.script_exec(container, "curl", ExecOutput {
            exit_code: 0,
            stdout: ip.to_string(),
            stderr: String::new(),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerControl for FakeContainers {
    async fn is_running(&self, name: &str) -> Result<bool> {
        self.record(format!("is_running {}", name));
        if let Some((indeterminate, msg)) = self.inspect_errors.lock().unwrap().get(name) {
            return Err(if *indeterminate {
                WatchError::Internal(msg.clone())
            } else {
                WatchError::container(name, msg.clone())
            });
        }
        Ok(self.running.lock().unwrap().get(name).copied().unwrap_or(false))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record(format!("start {}", name));
        self.set_running(name, true);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.record(format!("stop {}", name));
        self.set_running(name, false);
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.record(format!("restart {}", name));
        self.set_running(name, true);
        Ok(())
    }

    async fn exec(&self, name: &str, argv: &[&str]) -> Result<ExecOutput> {
        self.record(format!("exec {} {}", name, argv.join(" ")));
        let program = argv.first().copied().unwrap_or_default();
        if let Some(out) = self
            .scripts
            .lock()
            .unwrap()
            .get(&(name.to_string(), program.to_string()))
        {
            return Ok(out.clone());
        }
        if program == "ip" {
            return Ok(match self.tunnel_ips.lock().unwrap().get(name) {
                Some(ip) => ExecOutput {
                    exit_code: 0,
                    stdout: format!("5: tun0    inet {}/24 scope global tun0", ip),
                    stderr: String::new(),
                },
                None => ExecOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "Device \"tun0\" does not exist.".into(),
                },
            });
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

pub struct FakeRpc {
    pub reachable: AtomicBool,
    pub connects: AtomicUsize,
}

impl FakeRpc {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TorrentRpc for FakeRpc {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WatchError::Rpc("connection refused".into()))
        }
    }

    async fn session_summary(&self) -> Result<TorrentSummary> {
        self.connect().await?;
        Ok(TorrentSummary {
            downloading: 2,
            seeding: 5,
            download_rate: 1024.0,
            upload_rate: 512.0,
        })
    }
}

pub struct FakeMediaServer {
    pub up: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeMediaServer {
    pub fn new(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    async fn identity(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WatchError::MediaServer("connection refused".into()))
        }
    }

    async fn sessions(&self) -> Result<SessionSummary> {
        self.identity().await?;
        Ok(SessionSummary {
            active_sessions: 1,
            unique_clients: 1,
            transcoding: 0,
        })
    }
}

pub struct FakeEndpoint {
    name: String,
    status: Mutex<std::result::Result<u16, String>>,
}

impl FakeEndpoint {
    pub fn new(name: &str, status: std::result::Result<u16, String>) -> Self {
        Self {
            name: name.to_string(),
            status: Mutex::new(status),
        }
    }

    pub fn set_status(&self, status: std::result::Result<u16, String>) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl StatusEndpoint for FakeEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status_code(&self) -> Result<u16> {
        self.status
            .lock()
            .unwrap()
            .clone()
            .map_err(WatchError::Malformed)
    }
}

pub struct FakeCerts {
    result: std::result::Result<CertInfo, String>,
}

impl FakeCerts {
    pub fn new(result: std::result::Result<CertInfo, String>) -> Self {
        Self { result }
    }
}

#[async_trait]
impl CertificateSource for FakeCerts {
    async fn inspect(&self, _host: &str, _port: u16) -> Result<CertInfo> {
        self.result.clone().map_err(WatchError::Malformed)
    }
}

pub struct FakeResolver {
    addrs: Mutex<Vec<Ipv4Addr>>,
}

impl FakeResolver {
    pub fn new(addrs: Vec<Ipv4Addr>) -> Self {
        Self {
            addrs: Mutex::new(addrs),
        }
    }

    pub fn set(&self, addrs: Vec<Ipv4Addr>) {
        *self.addrs.lock().unwrap() = addrs;
    }
}

#[async_trait]
impl NameResolver for FakeResolver {
    async fn resolve_a(&self, _domain: &str) -> Result<Vec<Ipv4Addr>> {
        Ok(self.addrs.lock().unwrap().clone())
    }
}

pub struct FakePublicIp {
    ip: Option<Ipv4Addr>,
}

impl FakePublicIp {
    pub fn new(ip: Option<Ipv4Addr>) -> Self {
        Self { ip }
    }
}

#[async_trait]
impl PublicIpSource for FakePublicIp {
    async fn public_ipv4(&self) -> Result<Ipv4Addr> {
        self.ip
            .ok_or_else(|| WatchError::Malformed("no route to echo service".into()))
    }
}

#[derive(Default)]
pub struct FakeDns {
    pub updates: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn update(&self, subdomain: &str, _token: &str, ip: &str) -> Result<String> {
        self.updates
            .lock()
            .unwrap()
            .push((subdomain.to_string(), ip.to_string()));
        Ok("OK".to_string())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn any_contains(&self, needle: &str) -> bool {
        self.messages.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

pub const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

/// Handles on every fake behind a [`Services`] bundle
pub struct Fakes {
    pub containers: Arc<FakeContainers>,
    pub torrent: Arc<FakeRpc>,
    pub plex: Arc<FakeMediaServer>,
    pub plex_remote: Arc<FakeEndpoint>,
    pub radarr: Arc<FakeEndpoint>,
    pub sonarr: Arc<FakeEndpoint>,
    pub dns: Arc<FakeDns>,
    pub resolver: Arc<FakeResolver>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

impl Fakes {
    /// A fully healthy installation with the default container names
    pub fn healthy() -> Self {
        let containers = Arc::new(FakeContainers::with_running(&[
            "vpn", "deluge", "plex", "radarr", "sonarr", "nginx",
        ]));
        containers.set_tunnel_ip("vpn", "10.8.0.5");
        containers.set_egress_ip("deluge", "198.51.100.20");
        containers.set_egress_ip("vpn", "198.51.100.20");

        let torrent = Arc::new(FakeRpc::new(true));
        let plex = Arc::new(FakeMediaServer::new(true));
        let plex_remote = Arc::new(FakeEndpoint::new("plex_remote", Ok(200)));
        let radarr = Arc::new(FakeEndpoint::new("radarr", Ok(200)));
        let sonarr = Arc::new(FakeEndpoint::new("sonarr", Ok(200)));
        let dns = Arc::new(FakeDns::default());
        let resolver = Arc::new(FakeResolver::new(vec![PUBLIC_IP]));
        let notifier = Arc::new(RecordingNotifier::default());
        let certs = Arc::new(FakeCerts::new(Ok(CertInfo {
            verified: true,
            not_after: chrono::Utc::now() + chrono::Duration::days(60),
        })));

        let services = Services {
            containers: containers.clone(),
            torrent: torrent.clone(),
            plex: plex.clone(),
            plex_remote: Some(plex_remote.clone()),
            radarr: radarr.clone(),
            sonarr: sonarr.clone(),
            dns: dns.clone(),
            public_ip: Arc::new(FakePublicIp::new(Some(PUBLIC_IP))),
            resolver: resolver.clone(),
            certs,
            notifier: notifier.clone(),
        };

        Self {
            containers,
            torrent,
            plex,
            plex_remote,
            radarr,
            sonarr,
            dns,
            resolver,
            notifier,
            services,
        }
    }
}
