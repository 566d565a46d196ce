#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mediawatch::adapters::{
    CertInfo, CertificateSource, ContainerControl, DnsProvider, ExecOutput, MediaServer,
    NameResolver, Notifier, PublicIpSource, SessionSummary, StatusEndpoint, TorrentRpc,
    TorrentSummary,
};
use mediawatch::{Result, Services, WatchError};

pub const TUNNEL_IP: &str = "10.8.0.5";
pub const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

/// Docker stand-in: tracks running state and records every call
pub struct Docker {
    running: Mutex<HashMap<String, bool>>,
    pub tunnel_ip: Mutex<Option<String>>,
    pub online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl Docker {
    pub fn healthy() -> Self {
        let running = ["plex", "deluge", "vpn", "radarr", "sonarr", "nginx"]
            .iter()
            .map(|n| (n.to_string(), true))
            .collect();
        Self {
            running: Mutex::new(running),
            tunnel_ip: Mutex::new(Some(TUNNEL_IP.to_string())),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_running(&self, name: &str, running: bool) {
        self.running.lock().unwrap().insert(name.to_string(), running);
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn exec_ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ContainerControl for Docker {
    async fn is_running(&self, name: &str) -> Result<bool> {
        self.record(format!("is_running {}", name));
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
        match argv.first().copied() {
            Some("ip") => Ok(match self.tunnel_ip.lock().unwrap().clone() {
                Some(ip) => exec_ok(&format!("5: tun0    inet {}/24 scope global tun0", ip)),
                None => ExecOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "Device \"tun0\" does not exist.".into(),
                },
            }),
            Some("curl") if self.online.load(Ordering::SeqCst) => Ok(exec_ok("198.51.100.20")),
            Some("curl") => Ok(ExecOutput {
                exit_code: 28,
                stdout: String::new(),
                stderr: "timed out".into(),
            }),
            _ => Ok(exec_ok("")),
        }
    }
}

pub struct Torrent {
    pub reachable: AtomicBool,
    pub connects: AtomicUsize,
}

#[async_trait]
impl TorrentRpc for Torrent {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WatchError::Rpc("connection refused".into()))
        }
    }

    async fn session_summary(&self) -> Result<TorrentSummary> {
        Ok(TorrentSummary::default())
    }
}

pub struct Plex {
    pub up: AtomicBool,
}

#[async_trait]
impl MediaServer for Plex {
    async fn identity(&self) -> Result<()> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WatchError::MediaServer("connection refused".into()))
        }
    }

    async fn sessions(&self) -> Result<SessionSummary> {
        Ok(SessionSummary::default())
    }
}

pub struct Endpoint(pub &'static str);

#[async_trait]
impl StatusEndpoint for Endpoint {
    fn name(&self) -> &str {
        self.0
    }

    async fn status_code(&self) -> Result<u16> {
        Ok(200)
    }
}

struct Certs;

#[async_trait]
impl CertificateSource for Certs {
    async fn inspect(&self, _host: &str, _port: u16) -> Result<CertInfo> {
        Ok(CertInfo {
            verified: true,
            not_after: chrono::Utc::now() + chrono::Duration::days(60),
        })
    }
}

struct Dns;

#[async_trait]
impl DnsProvider for Dns {
    async fn update(&self, _subdomain: &str, _token: &str, _ip: &str) -> Result<String> {
        Ok("OK".into())
    }
}

struct FixedIp;

#[async_trait]
impl PublicIpSource for FixedIp {
    async fn public_ipv4(&self) -> Result<Ipv4Addr> {
        Ok(PUBLIC_IP)
    }
}

#[async_trait]
impl NameResolver for FixedIp {
    async fn resolve_a(&self, _domain: &str) -> Result<Vec<Ipv4Addr>> {
        Ok(vec![PUBLIC_IP])
    }
}

#[derive(Default)]
pub struct Inbox {
    messages: Mutex<Vec<String>>,
}

impl Inbox {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn any_contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for Inbox {
    async fn send(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

/// A healthy installation plus handles on the parts tests poke at
pub struct Rig {
    pub docker: Arc<Docker>,
    pub torrent: Arc<Torrent>,
    pub plex: Arc<Plex>,
    pub inbox: Arc<Inbox>,
    pub services: Services,
}

impl Rig {
    pub fn healthy() -> Self {
        let docker = Arc::new(Docker::healthy());
        let torrent = Arc::new(Torrent {
            reachable: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
        });
        let plex = Arc::new(Plex {
            up: AtomicBool::new(true),
        });
        let inbox = Arc::new(Inbox::default());
        let services = Services {
            containers: docker.clone(),
            torrent: torrent.clone(),
            plex: plex.clone(),
            plex_remote: Some(Arc::new(Endpoint("plex_remote"))),
            radarr: Arc::new(Endpoint("radarr")),
            sonarr: Arc::new(Endpoint("sonarr")),
            dns: Arc::new(Dns),
            public_ip: Arc::new(FixedIp),
            resolver: Arc::new(FixedIp),
            certs: Arc::new(Certs),
            notifier: inbox.clone(),
        };
        Self {
            docker,
            torrent,
            plex,
            inbox,
            services,
        }
    }
}

/// Deluge `core.conf` bound to `ip`
pub fn core_conf(ip: &str) -> String {
    format!(
        "{{\n    \"file\": 1,\n    \"format\": 1\n}}{{\n    \"listen_interface\": \"{ip}\",\n    \"outgoing_interface\": \"{ip}\",\n    \"max_connections_global\": 200\n}}"
    )
}
