//! Alert Dispatcher: fan-out to every configured channel, each independently
//! rate-limited and retried.
//!
//! Rate limiting is a simple per-minute token bucket - refilled once a
//! minute rather than continuously, which matches how most chat/webhook
//! APIs advertise their limits. Retries follow a fixed exponential backoff
//! of 1s, 2s, 4s; a 429 response's `Retry-After` hint overrides the backoff
//! schedule for that attempt, and any other 4xx is treated as terminal -
//! retrying a malformed request does not become valid on the second try.

use super::channels::{AlertChannel, SendOutcome};
use crate::model::Alert;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const BACKOFF_SCHEDULE: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

struct TokenBucket {
    capacity: u32,
    remaining: AtomicU32,
    refilled_at: Mutex<Instant>,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self { capacity, remaining: AtomicU32::new(capacity), refilled_at: Mutex::new(Instant::now()) }
    }

    fn try_acquire(&self) -> bool {
        let mut refilled_at = self.refilled_at.lock().unwrap();
        if refilled_at.elapsed() >= Duration::from_secs(60) {
            self.remaining.store(self.capacity, Ordering::SeqCst);
            *refilled_at = Instant::now();
        }
        drop(refilled_at);

        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| if r > 0 { Some(r - 1) } else { None })
            .is_ok()
    }
}

struct ChannelSlot {
    channel: Box<dyn AlertChannel>,
    bucket: TokenBucket,
}

pub struct AlertDispatcher {
    channels: Vec<ChannelSlot>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self { channels: Vec::new() }
    }

    pub fn add_channel(&mut self, channel: Box<dyn AlertChannel>, per_minute_rate_limit: u32) {
        self.channels.push(ChannelSlot { channel, bucket: TokenBucket::new(per_minute_rate_limit) });
    }

    /// Dispatch to every configured channel concurrently; a failure on one
    /// channel does not block delivery on another. Returns each channel's
    /// name mapped to whether delivery ultimately succeeded, for persistence
    /// alongside the alert row.
    pub async fn dispatch(&self, alert: &Alert) -> HashMap<String, bool> {
        let futures = self
            .channels
            .iter()
            .map(|slot| async move { (slot.channel.name().to_string(), self.send_with_retry(slot, alert).await) });
        futures::future::join_all(futures).await.into_iter().collect()
    }

    async fn send_with_retry(&self, slot: &ChannelSlot, alert: &Alert) -> bool {
        if !slot.bucket.try_acquire() {
            log::warn!("alert channel {} rate-limited, dropping alert for {}", slot.channel.name(), alert.mint);
            return false;
        }

        for (attempt, default_backoff) in BACKOFF_SCHEDULE.iter().enumerate() {
            match slot.channel.send(alert).await {
                Ok(SendOutcome::Sent) => {
                    log::info!("alert dispatched via {} for {}", slot.channel.name(), alert.mint);
                    return true;
                }
                Ok(SendOutcome::Terminal(reason)) => {
                    log::warn!("alert via {} terminally rejected: {}", slot.channel.name(), reason);
                    return false;
                }
                Ok(SendOutcome::RetryAfter(hint)) => {
                    log::warn!("alert via {} rate-limited upstream, retrying after {:?}", slot.channel.name(), hint);
                    tokio::time::sleep(hint).await;
                }
                Err(e) => {
                    log::warn!("alert via {} failed (attempt {}): {}", slot.channel.name(), attempt + 1, e);
                    tokio::time::sleep(*default_backoff).await;
                }
            }
        }

        log::error!("alert via {} for {} exhausted all retries", slot.channel.name(), alert.mint);
        false
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FlakyChannel {
        attempts: Arc<AtomicUsize>,
        fail_times: usize,
    }

    #[async_trait]
    impl AlertChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn send(&self, _alert: &Alert) -> anyhow::Result<SendOutcome> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Ok(SendOutcome::Terminal("simulated rejection".to_string()))
            } else {
                Ok(SendOutcome::Sent)
            }
        }
    }

    fn sample_alert() -> Alert {
        Alert {
            id: "alert-1".to_string(),
            mint: "MINT1".to_string(),
            trigger_reason: "buy_burst".to_string(),
            coordination_score: 0.8,
            confidence: 0.9,
            risk_level: "HIGH".to_string(),
            summary: "test".to_string(),
            top_buyers: Vec::new(),
            cluster_summary: String::new(),
            market_cap_usd: None,
            enrichment_degraded: false,
            created_at: 0,
            delivery: std::collections::HashMap::new(),
        }
    }

    #[tokio::test]
    async fn terminal_rejection_does_not_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = AlertDispatcher::new();
        dispatcher.add_channel(Box::new(FlakyChannel { attempts: attempts.clone(), fail_times: 99 }), 20);
        let delivery = dispatcher.dispatch(&sample_alert()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(delivery.get("flaky"), Some(&false));
    }

    #[tokio::test]
    async fn rate_limit_drops_alert_when_bucket_empty() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = AlertDispatcher::new();
        dispatcher.add_channel(Box::new(FlakyChannel { attempts: attempts.clone(), fail_times: 0 }), 1);

        let first = dispatcher.dispatch(&sample_alert()).await;
        let second = dispatcher.dispatch(&sample_alert()).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(first.get("flaky"), Some(&true));
        assert_eq!(second.get("flaky"), Some(&false));
    }
}
