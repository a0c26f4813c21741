//! `StreamBackend` trait plus its Redis Streams implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait StreamBackend: Send + Sync {
    async fn push(&self, payload: &[u8]) -> Result<String>;
    async fn read(&self, consumer_name: &str, count: usize, block_ms: usize) -> Result<Vec<StreamMessage>>;
    async fn ack(&self, ids: &[String]) -> Result<()>;
    async fn claim_stale(&self, consumer_name: &str, min_idle_ms: u64, count: usize) -> Result<Vec<StreamMessage>>;
    async fn len(&self) -> Result<usize>;
}

pub struct RedisStreamBackend {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    maxlen_approx: usize,
}

impl RedisStreamBackend {
    pub async fn connect(url: &str, stream_key: &str, group: &str, maxlen_approx: usize) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid REDIS_URL")?;
        let mut conn = ConnectionManager::new(client).await.context("failed to connect to redis")?;

        // XGROUP CREATE ... MKSTREAM, tolerating BUSYGROUP if it already exists.
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream::<_, _, _, ()>(stream_key, group, "$")
            .await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e).context("failed to create consumer group")?;
            }
        }

        Ok(Self {
            conn,
            stream_key: stream_key.to_string(),
            group: group.to_string(),
            maxlen_approx,
        })
    }
}

#[async_trait]
impl StreamBackend for RedisStreamBackend {
    async fn push(&self, payload: &[u8]) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.maxlen_approx)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .context("XADD failed")?;
        Ok(id)
    }

    async fn read(&self, consumer_name: &str, count: usize, block_ms: usize) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(&self.group, consumer_name)
            .count(count)
            .block(block_ms);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .context("XREADGROUP failed")?;

        Ok(parse_stream_reply(reply))
    }

    async fn ack(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&self.stream_key, &self.group, ids).await.context("XACK failed")?;
        Ok(())
    }

    async fn claim_stale(&self, consumer_name: &str, min_idle_ms: u64, count: usize) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, &self.group, "-", "+", count)
            .context("invalid XPENDING args")?
            .query_async(&mut conn)
            .await
            .context("XPENDING failed")?;

        let stale_ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.time_since_delivered >= min_idle_ms as usize)
            .map(|p| p.id)
            .collect();

        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: redis::streams::StreamClaimReply = conn
            .xclaim(&self.stream_key, &self.group, consumer_name, min_idle_ms as usize, &stale_ids)
            .await
            .context("XCLAIM failed")?;

        Ok(claimed
            .ids
            .into_iter()
            .filter_map(|entry| {
                let payload = extract_payload(&entry.map)?;
                Some(StreamMessage { id: entry.id, payload })
            })
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn.xlen(&self.stream_key).await.context("XLEN failed")?;
        Ok(len)
    }
}

fn parse_stream_reply(reply: redis::streams::StreamReadReply) -> Vec<StreamMessage> {
    let mut out = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            if let Some(payload) = extract_payload(&entry.map) {
                out.push(StreamMessage { id: entry.id, payload });
            }
        }
    }
    out
}

fn extract_payload(map: &HashMap<String, redis::Value>) -> Option<Vec<u8>> {
    match map.get("payload")? {
        redis::Value::Data(bytes) => Some(bytes.clone()),
        redis::Value::Status(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}

/// In-memory test double so higher layers can be exercised without a live
/// Redis instance.
pub struct InMemoryStreamBackend {
    inner: tokio::sync::Mutex<InMemoryState>,
}

struct InMemoryState {
    next_id: u64,
    entries: Vec<(String, Vec<u8>)>,
    pending: std::collections::HashSet<String>,
}

impl InMemoryStreamBackend {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(InMemoryState {
                next_id: 1,
                entries: Vec::new(),
                pending: std::collections::HashSet::new(),
            }),
        }
    }
}

impl Default for InMemoryStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamBackend for InMemoryStreamBackend {
    async fn push(&self, payload: &[u8]) -> Result<String> {
        let mut state = self.inner.lock().await;
        let id = format!("{}-0", state.next_id);
        state.next_id += 1;
        state.entries.push((id.clone(), payload.to_vec()));
        Ok(id)
    }

    async fn read(&self, _consumer_name: &str, count: usize, _block_ms: usize) -> Result<Vec<StreamMessage>> {
        let mut state = self.inner.lock().await;
        let mut out = Vec::new();
        for (id, payload) in state.entries.iter() {
            if out.len() >= count {
                break;
            }
            if state.pending.contains(id) {
                continue;
            }
            out.push(StreamMessage { id: id.clone(), payload: payload.clone() });
        }
        for msg in &out {
            state.pending.insert(msg.id.clone());
        }
        Ok(out)
    }

    async fn ack(&self, ids: &[String]) -> Result<()> {
        let mut state = self.inner.lock().await;
        for id in ids {
            state.pending.remove(id);
        }
        Ok(())
    }

    async fn claim_stale(&self, _consumer_name: &str, _min_idle_ms: u64, _count: usize) -> Result<Vec<StreamMessage>> {
        Ok(Vec::new())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.lock().await.entries.len())
    }
}
