//! Signature-level dedup filter.
//!
//! Redis is the source of truth (`SET key b"1" EX ttl NX`), backed by a
//! small local LRU so the common case - the same signature arriving twice in
//! quick succession on the same consumer - never has to round-trip to Redis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lru::LruCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

#[async_trait]
pub trait DedupBackend: Send + Sync {
    /// Returns `true` if `key` was already present, `false` if it was newly
    /// recorded (and therefore should be treated as not-a-duplicate).
    async fn set_nx(&self, key: &str, ttl_secs: u64) -> Result<bool>;
}

pub struct RedisDedupBackend {
    conn: ConnectionManager,
}

impl RedisDedupBackend {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DedupBackend for RedisDedupBackend {
    async fn set_nx(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let set: bool = conn.set_nx(key, 1u8).await.context("dedup SETNX failed")?;
        if set {
            let _: () = conn.expire(key, ttl_secs as i64).await.context("dedup EXPIRE failed")?;
        }
        Ok(!set)
    }
}

/// In-memory test double: a plain map of key -> insertion time, with TTL
/// checked on read rather than via a background sweep.
pub struct InMemoryDedupBackend {
    seen: Mutex<HashMap<String, std::time::Instant>>,
}

impl InMemoryDedupBackend {
    pub fn new() -> Self {
        Self { seen: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemoryDedupBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupBackend for InMemoryDedupBackend {
    async fn set_nx(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut seen = self.seen.lock().unwrap();
        if let Some(inserted_at) = seen.get(key) {
            if inserted_at.elapsed() < std::time::Duration::from_secs(ttl_secs) {
                return Ok(true);
            }
        }
        seen.insert(key.to_string(), std::time::Instant::now());
        Ok(false)
    }
}

pub struct DedupFilter {
    backend: std::sync::Arc<dyn DedupBackend>,
    ttl_secs: u64,
    local: Mutex<LruCache<String, ()>>,
}

impl DedupFilter {
    pub fn new(backend: std::sync::Arc<dyn DedupBackend>, ttl_secs: u64, local_capacity: usize) -> Self {
        Self {
            backend,
            ttl_secs,
            local: Mutex::new(LruCache::new(NonZeroUsize::new(local_capacity.max(1)).unwrap())),
        }
    }

    /// Returns `true` if `signature` has already been seen (i.e. this call is
    /// a duplicate), `false` if it's new and has now been recorded.
    pub async fn is_duplicate(&self, signature: &str) -> Result<bool> {
        {
            let mut local = self.local.lock().unwrap();
            if local.get(signature).is_some() {
                return Ok(true);
            }
        }

        let key = format!("dedup:{}", signature);
        let is_duplicate = self.backend.set_nx(&key, self.ttl_secs).await?;
        self.local.lock().unwrap().put(signature.to_string(), ());
        Ok(is_duplicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_occurrence_is_not_a_duplicate() {
        let filter = DedupFilter::new(std::sync::Arc::new(InMemoryDedupBackend::new()), 600, 100);
        assert!(!filter.is_duplicate("sig1").await.unwrap());
    }

    #[tokio::test]
    async fn repeated_signature_within_ttl_is_a_duplicate() {
        let filter = DedupFilter::new(std::sync::Arc::new(InMemoryDedupBackend::new()), 600, 100);
        assert!(!filter.is_duplicate("sig1").await.unwrap());
        assert!(filter.is_duplicate("sig1").await.unwrap());
        assert!(filter.is_duplicate("sig1").await.unwrap());
    }

    #[tokio::test]
    async fn distinct_signatures_are_independent() {
        let filter = DedupFilter::new(std::sync::Arc::new(InMemoryDedupBackend::new()), 600, 100);
        assert!(!filter.is_duplicate("sig1").await.unwrap());
        assert!(!filter.is_duplicate("sig2").await.unwrap());
    }
}
