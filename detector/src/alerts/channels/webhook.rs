//! Generic webhook alert channel - POSTs the alert as JSON.

use super::{AlertChannel, SendOutcome};
use crate::model::Alert;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: Client::new(), url: url.into() }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<SendOutcome> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("webhook request failed")?;

        let status = response.status();
        if status.is_success() {
            return Ok(SendOutcome::Sent);
        }

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(1));
            return Ok(SendOutcome::RetryAfter(retry_after));
        }

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Ok(SendOutcome::Terminal(format!("webhook rejected with {}: {}", status, body)));
        }

        anyhow::bail!("webhook returned server error: {}", status)
    }
}
