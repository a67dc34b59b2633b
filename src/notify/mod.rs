use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Sink for operator alerts. Delivery is best-effort: callers log and
/// ignore failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Posts `{"text": ...}` to a chat webhook (Slack/Discord/Telegram bridge).
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(WebhookNotifier {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("Webhook request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Webhook returned {}", resp.status());
        }
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        info!("[operator alert] {}", text);
        Ok(())
    }
}

/// Fire-and-forget delivery.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.notify(text).await {
        warn!("Operator notification failed (ignored): {}", e);
    }
}
