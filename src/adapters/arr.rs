//! Radarr / Sonarr status endpoint

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::http::StatusEndpoint;
use crate::error::Result;

/// Client for one *arr instance (v3 API)
pub struct ArrClient {
    name: &'static str,
    client: Client,
    base_url: String,
    api_key: String,
}

impl ArrClient {
    pub fn new(name: &'static str, base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name,
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status_url(&self) -> String {
        format!("{}/api/v3/system/status", self.base_url)
    }

    /// HTTP status of `GET /api/v3/system/status`
    pub async fn system_status(&self) -> Result<u16> {
        let resp = self
            .client
            .get(self.status_url())
            .header("X-Api-Key", &self.api_key)
            .send()
            .await?;
        Ok(resp.status().as_u16())
    }
}

#[async_trait]
impl StatusEndpoint for ArrClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn status_code(&self) -> Result<u16> {
        self.system_status().await
    }
}
