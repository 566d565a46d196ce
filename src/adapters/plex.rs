//! Plex Media Server HTTP API

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Result, WatchError};

/// Current playback activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub active_sessions: u32,
    pub unique_clients: u32,
    pub transcoding: u32,
}

/// Media server reached over HTTP
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// `GET /identity`; Ok only on HTTP 200
    async fn identity(&self) -> Result<()>;

    /// `GET /status/sessions`
    async fn sessions(&self) -> Result<SessionSummary>;
}

/// Plex client bound to one base URL
pub struct PlexClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct SessionsResponse {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

#[derive(Deserialize)]
struct MediaContainer {
    #[serde(default)]
    size: u32,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<SessionItem>,
}

#[derive(Deserialize)]
struct SessionItem {
    #[serde(rename = "Player")]
    player: Option<Player>,
    #[serde(rename = "TranscodeSession")]
    transcode_session: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Player {
    #[serde(rename = "machineIdentifier", default)]
    machine_identifier: String,
}

impl PlexClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        // The public URL goes through our own proxy; self-signed certs still count as reachable
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Plex-Token", &self.token)
            .header(header::ACCEPT, "application/json")
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    async fn identity(&self) -> Result<()> {
        let resp = self.get("/identity").send().await?;
        if resp.status() == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(WatchError::MediaServer(format!(
                "{} /identity returned {}",
                self.base_url,
                resp.status()
            )))
        }
    }

    async fn sessions(&self) -> Result<SessionSummary> {
        let resp = self.get("/status/sessions").send().await?;
        if !resp.status().is_success() {
            return Err(WatchError::MediaServer(format!(
                "/status/sessions returned {}",
                resp.status()
            )));
        }
        let body = resp.text().await?;
        parse_sessions(&body)
    }
}

/// Reduce a `/status/sessions` JSON body to counts
pub fn parse_sessions(body: &str) -> Result<SessionSummary> {
    let parsed: SessionsResponse = serde_json::from_str(body)
        .map_err(|e| WatchError::Malformed(format!("sessions: {}", e)))?;
    let container = parsed.media_container;

    let clients: HashSet<&str> = container
        .metadata
        .iter()
        .filter_map(|item| item.player.as_ref())
        .map(|p| p.machine_identifier.as_str())
        .filter(|id| !id.is_empty())
        .collect();

    let transcoding = container
        .metadata
        .iter()
        .filter(|item| item.transcode_session.is_some())
        .count() as u32;

    Ok(SessionSummary {
        active_sessions: container.size.max(container.metadata.len() as u32),
        unique_clients: clients.len() as u32,
        transcoding,
    })
}
