//! Chat-bot alert channel (Telegram-style bot API).
//!
//! Same request/retry shape as the webhook channel, aimed at a bot API's
//! `sendMessage` endpoint instead of an arbitrary webhook URL.

use super::{AlertChannel, SendOutcome};
use crate::model::Alert;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub struct BotApiChannel {
    client: Client,
    token: String,
    chat_id: String,
}

impl BotApiChannel {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self { client: Client::new(), token: token.into(), chat_id: chat_id.into() }
    }

    fn format_message(alert: &Alert) -> String {
        format!(
            "coordination alert: {}\nreason: {}\nscore: {:.2} ({})\nconfidence: {:.2}\n{}",
            alert.mint, alert.trigger_reason, alert.coordination_score, alert.risk_level, alert.confidence, alert.summary
        )
    }
}

#[async_trait::async_trait]
impl AlertChannel for BotApiChannel {
    fn name(&self) -> &str {
        "bot_api"
    }

    async fn send(&self, alert: &Alert) -> Result<SendOutcome> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": Self::format_message(alert),
            }))
            .send()
            .await
            .context("bot api request failed")?;

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
            return Ok(SendOutcome::Terminal(format!("bot api rejected with {}: {}", status, body)));
        }

        anyhow::bail!("bot api returned server error: {}", status)
    }
}
