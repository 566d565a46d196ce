//! Notification gateway
//!
//! Sends human-readable status text to a Discord webhook. Delivery is best
//! effort: failures are logged and swallowed so the caller never blocks its
//! own logic on the channel being up.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::NotifierConfig;

/// Discord rejects message content longer than this
const DISCORD_MAX_CONTENT: usize = 2000;

/// Longest rate-limit wait honoured before dropping a message
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Best-effort text notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`; never fails to the caller
    async fn send(&self, text: &str);
}

/// Build the notifier described by the configuration
pub fn from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match &config.discord_webhook_url {
        Some(url) if !url.is_empty() => {
            info!("Discord notifications enabled");
            Arc::new(DiscordNotifier::new(
                url.clone(),
                config.username.clone(),
                Duration::from_secs(config.timeout_secs),
            ))
        }
        _ => {
            info!("No webhook configured; notifications go to the log only");
            Arc::new(LogNotifier)
        }
    }
}

/// Discord webhook client
#[derive(Clone)]
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    username: String,
}

#[derive(Serialize)]
struct DiscordMessage<'a> {
    content: &'a str,
    username: &'a str,
}

#[derive(Deserialize)]
struct RateLimited {
    retry_after: f64,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String, username: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            webhook_url,
            username,
        }
    }

    async fn post(&self, content: &str) -> Result<PostResult, String> {
        let message = DiscordMessage {
            content,
            username: &self.username,
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if status.is_success() {
            return Ok(PostResult::Delivered);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .json::<RateLimited>()
                .await
                .map(|r| Duration::from_secs_f64(r.retry_after.max(0.0)))
                .unwrap_or(Duration::from_secs(1));
            return Ok(PostResult::RetryAfter(retry_after));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(format!("HTTP {}: {}", status, body))
    }
}

enum PostResult {
    Delivered,
    RetryAfter(Duration),
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, text: &str) {
        let content = truncate(text, DISCORD_MAX_CONTENT);

        match self.post(&content).await {
            Ok(PostResult::Delivered) => debug!("Discord notification sent"),
            Ok(PostResult::RetryAfter(wait)) if wait <= MAX_RETRY_AFTER => {
                warn!(wait_ms = wait.as_millis() as u64, "Discord rate limited, retrying once");
                tokio::time::sleep(wait).await;
                match self.post(&content).await {
                    Ok(PostResult::Delivered) => debug!("Discord notification sent after retry"),
                    Ok(PostResult::RetryAfter(_)) => {
                        warn!("Discord still rate limited, dropping notification")
                    }
                    Err(e) => error!("Discord notification failed: {}", e),
                }
            }
            Ok(PostResult::RetryAfter(wait)) => {
                warn!(
                    wait_secs = wait.as_secs(),
                    "Discord rate limit too long, dropping notification"
                );
            }
            Err(e) => error!("Discord notification failed: {}", e),
        }
    }
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        info!(notification = %text, "notify");
    }
}

/// Cut `text` to at most `max` characters, marking the cut
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}
