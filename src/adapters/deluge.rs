//! Deluge torrent daemon: Web JSON-RPC client and `core.conf` handling

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::DelugeConfig;
use crate::error::{Result, WatchError};

/// Torrent counts and transfer rates
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorrentSummary {
    pub downloading: u32,
    pub seeding: u32,
    /// Bytes per second
    pub download_rate: f64,
    /// Bytes per second
    pub upload_rate: f64,
}

/// Torrent daemon RPC
#[async_trait]
pub trait TorrentRpc: Send + Sync {
    /// Authenticate and make sure the web layer is attached to a daemon
    async fn connect(&self) -> Result<()>;

    async fn session_summary(&self) -> Result<TorrentSummary>;
}

/// Deluge Web UI JSON-RPC client (`/json`)
pub struct DelugeWebClient {
    client: Client,
    endpoint: String,
    password: String,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
}

impl DelugeWebClient {
    pub fn new(host: &str, port: u16, password: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("http://{}:{}/json", host, port),
            password: password.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &DelugeConfig) -> Result<Self> {
        Self::new(&config.host, config.port, &config.password, config.timeout())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "deluge rpc");

        let resp: RpcResponse = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "method": method, "params": params, "id": id }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match resp.error {
            Some(err) => Err(WatchError::Rpc(format!("{}: {}", method, err.message))),
            None => Ok(resp.result),
        }
    }
}

#[async_trait]
impl TorrentRpc for DelugeWebClient {
    async fn connect(&self) -> Result<()> {
        let logged_in = self.call("auth.login", json!([self.password])).await?;
        if logged_in != Value::Bool(true) {
            return Err(WatchError::Rpc("auth.login rejected".to_string()));
        }

        if self.call("web.connected", json!([])).await? == Value::Bool(true) {
            return Ok(());
        }

        // Attach the web layer to the first known daemon
        let hosts = self.call("web.get_hosts", json!([])).await?;
        let host_id = hosts
            .as_array()
            .and_then(|h| h.first())
            .and_then(|h| h.get(0))
            .and_then(Value::as_str)
            .ok_or_else(|| WatchError::Rpc("no daemon hosts configured".to_string()))?
            .to_string();
        self.call("web.connect", json!([host_id])).await?;

        if self.call("web.connected", json!([])).await? == Value::Bool(true) {
            Ok(())
        } else {
            Err(WatchError::Rpc("web layer not connected to daemon".to_string()))
        }
    }

    async fn session_summary(&self) -> Result<TorrentSummary> {
        let ui = self
            .call(
                "web.update_ui",
                json!([["state", "download_payload_rate", "upload_payload_rate"], {}]),
            )
            .await?;
        Ok(summarize_update_ui(&ui))
    }
}

/// Reduce a `web.update_ui` result to counts and rates
pub fn summarize_update_ui(ui: &Value) -> TorrentSummary {
    let mut summary = TorrentSummary::default();

    if let Some(torrents) = ui.get("torrents").and_then(Value::as_object) {
        for torrent in torrents.values() {
            match torrent.get("state").and_then(Value::as_str) {
                Some("Downloading") => summary.downloading += 1,
                Some("Seeding") => summary.seeding += 1,
                _ => {}
            }
        }
    }

    let stats = ui.get("stats");
    summary.download_rate = stats
        .and_then(|s| s.get("download_rate"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    summary.upload_rate = stats
        .and_then(|s| s.get("upload_rate"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    summary
}

/// Deluge's `core.conf`: a version header object followed by the settings object
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConf {
    header: Value,
    body: Map<String, Value>,
}

pub const LISTEN_INTERFACE: &str = "listen_interface";
pub const OUTGOING_INTERFACE: &str = "outgoing_interface";

impl CoreConf {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut values = serde_json::Deserializer::from_str(raw).into_iter::<Value>();

        let first = values
            .next()
            .ok_or_else(|| WatchError::DelugeConfig("empty core.conf".to_string()))??;
        let second = values.next().transpose()?;

        // Older files carry the settings object only
        let (header, body) = match second {
            Some(body) => (first, body),
            None => (json!({ "file": 1, "format": 1 }), first),
        };

        match body {
            Value::Object(body) => Ok(Self { header, body }),
            _ => Err(WatchError::DelugeConfig(
                "settings section is not an object".to_string(),
            )),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::parse(&raw)
    }

    pub fn listen_interface(&self) -> Option<&str> {
        self.body.get(LISTEN_INTERFACE).and_then(Value::as_str)
    }

    pub fn outgoing_interface(&self) -> Option<&str> {
        self.body.get(OUTGOING_INTERFACE).and_then(Value::as_str)
    }

    /// True when both interfaces already point at `ip`
    pub fn is_bound_to(&self, ip: &str) -> bool {
        self.listen_interface() == Some(ip) && self.outgoing_interface() == Some(ip)
    }

    /// Point both interfaces at `ip`; returns whether anything changed
    pub fn bind_to(&mut self, ip: &str) -> bool {
        if self.is_bound_to(ip) {
            return false;
        }
        self.body
            .insert(LISTEN_INTERFACE.to_string(), Value::String(ip.to_string()));
        self.body
            .insert(OUTGOING_INTERFACE.to_string(), Value::String(ip.to_string()));
        true
    }

    /// Serialize in Deluge's layout: two 4-space indented objects back to back
    pub fn render(&self) -> Result<String> {
        let mut out = to_pretty4(&self.header)?;
        out.push_str(&to_pretty4(&Value::Object(self.body.clone()))?);
        Ok(out)
    }
}

fn to_pretty4(value: &Value) -> Result<String> {
    use serde::Serialize;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| WatchError::Internal(e.to_string()))
}
