//! Tier state machine: COLD -> WARM -> HOT.
//!
//! A mint starts COLD. The maintenance worker (or an explicit caller) moves
//! it to WARM once it shows enough activity to be worth tracking closely,
//! and to HOT once a trigger fires and it clears the market-cap floor.
//! Promotion to HOT is idempotent: re-triggering an already-HOT mint just
//! refreshes its TTL rather than re-running backfill or re-enqueuing
//! alerts. HOT membership carries a TTL in Redis; expiry demotes a mint back
//! to COLD (the profile itself is never deleted), and `refresh_hot_tokens`
//! keeps genuinely active mints alive by reconciling TTL drift.

use crate::model::TokenTier;
use crate::storage::ProfileStore;
use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;

pub struct StateManager {
    redis: ConnectionManager,
    profiles: Arc<ProfileStore>,
    hot_ttl_secs: u64,
    mcap_floor_usd: f64,
}

impl StateManager {
    pub fn new(redis: ConnectionManager, profiles: Arc<ProfileStore>, hot_ttl_secs: u64, mcap_floor_usd: f64) -> Self {
        Self { redis, profiles, hot_ttl_secs, mcap_floor_usd }
    }

    fn hot_key(mint: &str) -> String {
        format!("hot:{}", mint)
    }

    /// Resolve current tier: Redis hot-set first (fast path), falling back
    /// to the durable profile, defaulting to COLD if the mint is unknown.
    pub async fn get_state(&self, mint: &str) -> Result<TokenTier> {
        let mut conn = self.redis.clone();
        let is_hot: bool = conn.exists(Self::hot_key(mint)).await.context("hot-set EXISTS failed")?;
        if is_hot {
            return Ok(TokenTier::Hot);
        }
        if let Some(profile) = self.profiles.get_token_profile(mint).await? {
            return Ok(profile.state);
        }
        Ok(TokenTier::Cold)
    }

    pub async fn transition_to_warm(&self, mint: &str, now: i64) -> Result<()> {
        let mut profile = self
            .profiles
            .get_token_profile(mint)
            .await?
            .unwrap_or_else(|| crate::model::TokenProfile::new(mint, now));
        profile.state = TokenTier::Warm;
        profile.last_seen = now;
        self.profiles.upsert_token_profile(&profile).await
    }

    /// Promote to HOT, enqueueing backfill only on the COLD/WARM -> HOT
    /// transition. Re-triggering an already-HOT mint just refreshes its TTL.
    pub async fn transition_to_hot(
        &self,
        mint: &str,
        now: i64,
        trigger_reason: &str,
        market_cap_usd: Option<f64>,
        backfill_queue: &BackfillQueue,
    ) -> Result<bool> {
        if let Some(mcap) = market_cap_usd {
            if mcap < self.mcap_floor_usd {
                log::info!("mint {} cleared trigger but failed market-cap floor ({} < {})", mint, mcap, self.mcap_floor_usd);
                return Ok(false);
            }
        }

        let already_hot = self.get_state(mint).await? == TokenTier::Hot;

        let mut conn = self.redis.clone();
        let _: () = conn.set_ex(Self::hot_key(mint), 1u8, self.hot_ttl_secs).await.context("hot-set SETEX failed")?;
        let _: () = conn.sadd("hot_tokens", mint).await.context("hot_tokens SADD failed")?;

        let mut profile = self
            .profiles
            .get_token_profile(mint)
            .await?
            .unwrap_or_else(|| crate::model::TokenProfile::new(mint, now));
        profile.state = TokenTier::Hot;
        profile.last_seen = now;
        profile.trigger_reason = Some(trigger_reason.to_string());
        profile.market_cap_usd = market_cap_usd;
        if !already_hot {
            profile.became_hot_at = Some(now);
        }
        self.profiles.upsert_token_profile(&profile).await?;

        if !already_hot {
            backfill_queue.enqueue(mint.to_string()).await;
            log::info!("mint {} promoted to HOT: {}", mint, trigger_reason);
        } else {
            log::debug!("mint {} re-triggered while already HOT: TTL refreshed", mint);
        }

        Ok(!already_hot)
    }

    pub async fn transition_to_cold(&self, mint: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(Self::hot_key(mint)).await.context("hot-set DEL failed")?;
        let _: () = conn.srem("hot_tokens", mint).await.context("hot_tokens SREM failed")?;
        Ok(())
    }

    /// Demote any mint whose Redis TTL has lapsed but whose durable profile
    /// still says HOT (crash-recovery / TTL-drift reconciliation).
    pub async fn refresh_hot_tokens(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn.smembers("hot_tokens").await.context("hot_tokens SMEMBERS failed")?;
        for mint in members {
            let still_hot: bool = conn.exists(Self::hot_key(&mint)).await.context("hot-set EXISTS failed")?;
            if !still_hot {
                let _: () = conn.srem("hot_tokens", &mint).await.context("hot_tokens SREM failed")?;
                if let Some(mut profile) = self.profiles.get_token_profile(&mint).await? {
                    profile.state = TokenTier::Cold;
                    self.profiles.upsert_token_profile(&profile).await?;
                }
                log::info!("mint {} HOT TTL expired, demoted to COLD", mint);
            }
        }
        Ok(())
    }
}

/// Queue of mints awaiting Delta Log backfill after a COLD/WARM -> HOT
/// transition. A dedicated worker drains this and replays each mint's
/// recent history through the detection pipeline so its counters reflect
/// activity that happened before promotion, not just after.
pub struct BackfillQueue {
    sender: tokio::sync::mpsc::UnboundedSender<String>,
    receiver: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<String>>,
}

impl BackfillQueue {
    pub fn new() -> Self {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self { sender, receiver: tokio::sync::Mutex::new(receiver) }
    }

    pub async fn enqueue(&self, mint: String) {
        let _ = self.sender.send(mint);
    }

    pub async fn dequeue(&self) -> Option<String> {
        self.receiver.lock().await.recv().await
    }
}

impl Default for BackfillQueue {
    fn default() -> Self {
        Self::new()
    }
}
