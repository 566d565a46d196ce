//! Plain HTTP status endpoints

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::Result;

/// A health endpoint judged only by the HTTP status it answers with
#[async_trait]
pub trait StatusEndpoint: Send + Sync {
    /// Label used in logs and notifications
    fn name(&self) -> &str;

    async fn status_code(&self) -> Result<u16>;
}

/// `GET url` with optional extra headers
pub struct HttpEndpoint {
    name: String,
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl HttpEndpoint {
    pub fn new(name: &str, url: &str, timeout: Duration) -> Result<Self> {
        // Reachability through our own proxy counts even with a self-signed cert
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            name: name.to_string(),
            client,
            url: url.to_string(),
            headers: Vec::new(),
        })
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusEndpoint for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status_code(&self) -> Result<u16> {
        let mut req = self.client.get(&self.url);
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        Ok(req.send().await?.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_an_error() {
        let endpoint =
            HttpEndpoint::new("plex_remote", "http://127.0.0.1:9/identity", Duration::from_secs(1))
                .unwrap()
                .with_header("X-Plex-Token", "t");
        assert_eq!(endpoint.url(), "http://127.0.0.1:9/identity");
        assert!(endpoint.status_code().await.is_err());
    }
}
