//! Outbound alert channels.

pub mod webhook;
pub mod bot_api;

use crate::model::Alert;
use anyhow::Result;
use async_trait::async_trait;

/// Outcome of a single send attempt, distinguishing "retry with a hint",
/// "retry after a backoff", and "don't bother retrying" - a 4xx that isn't
/// 429 means the request itself is malformed and retrying it verbatim will
/// only repeat the failure.
pub enum SendOutcome {
    Sent,
    RetryAfter(std::time::Duration),
    Terminal(String),
}

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, alert: &Alert) -> Result<SendOutcome>;
}
