//! Consumer pool: C workers pulling from the durable stream, each running
//! the full per-message pipeline (dedup -> delta build -> swap inference ->
//! counter update -> delta/touch log append) and acking on success.
//!
//! A message that fails mid-pipeline is simply left unacked; it becomes
//! visible to `claim_stale` once its idle time crosses the claim threshold,
//! and gets redelivered to whichever consumer claims it. This is what makes
//! the stream at-least-once rather than at-most-once.

use super::backend::{StreamBackend, StreamMessage};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: &StreamMessage) -> Result<()>;
}

pub struct ConsumerPool {
    backend: Arc<dyn StreamBackend>,
    processor: Arc<dyn MessageProcessor>,
    pool_size: usize,
    batch_size: usize,
    block_ms: usize,
    claim_idle_ms: u64,
}

impl ConsumerPool {
    pub fn new(
        backend: Arc<dyn StreamBackend>,
        processor: Arc<dyn MessageProcessor>,
        pool_size: usize,
        batch_size: usize,
        block_ms: usize,
        claim_idle_ms: u64,
    ) -> Self {
        Self { backend, processor, pool_size, batch_size, block_ms, claim_idle_ms }
    }

    /// Spawn the consumer workers plus a single stale-message reclaimer.
    /// Returns immediately; tasks run until `cancel` is triggered.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.pool_size + 1);

        for worker_id in 0..self.pool_size {
            let pool = self.clone();
            let cancel = cancel.clone();
            let consumer_name = format!("consumer-{}", worker_id);
            handles.push(tokio::spawn(async move {
                pool.run_worker(consumer_name, cancel).await;
            }));
        }

        let pool = self.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            pool.run_reclaimer(cancel).await;
        }));

        handles
    }

    async fn run_worker(&self, consumer_name: String, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                log::info!("consumer {} shutting down", consumer_name);
                return;
            }

            let messages = tokio::select! {
                result = self.backend.read(&consumer_name, self.batch_size, self.block_ms) => result,
                _ = cancel.cancelled() => return,
            };

            match messages {
                Ok(messages) => self.handle_batch(&consumer_name, messages).await,
                Err(e) => {
                    log::warn!("consumer {} read failed: {}", consumer_name, e);
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn handle_batch(&self, consumer_name: &str, messages: Vec<StreamMessage>) {
        if messages.is_empty() {
            return;
        }
        let mut acked = Vec::with_capacity(messages.len());
        for message in &messages {
            match self.processor.process(message).await {
                Ok(()) => acked.push(message.id.clone()),
                Err(e) => log::warn!("consumer {} failed processing {}: {}", consumer_name, message.id, e),
            }
        }
        if let Err(e) = self.backend.ack(&acked).await {
            log::warn!("consumer {} ack failed: {}", consumer_name, e);
        }
    }

    /// Periodically reclaim messages whose consumer died mid-processing.
    async fn run_reclaimer(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.claim_idle_ms.max(1000)));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => return,
            }

            match self.backend.claim_stale("reclaimer", self.claim_idle_ms, self.batch_size).await {
                Ok(claimed) if !claimed.is_empty() => {
                    log::info!("reclaimed {} stale messages", claimed.len());
                    self.handle_batch("reclaimer", claimed).await;
                }
                Ok(_) => {}
                Err(e) => log::warn!("stale-message claim failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::backend::InMemoryStreamBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        count: AtomicUsize,
    }

    #[async_trait]
    impl MessageProcessor for CountingProcessor {
        async fn process(&self, _message: &StreamMessage) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn processes_and_acks_pushed_messages() {
        let backend: Arc<dyn StreamBackend> = Arc::new(InMemoryStreamBackend::new());
        backend.push(b"a").await.unwrap();
        backend.push(b"b").await.unwrap();

        let processor = Arc::new(CountingProcessor { count: AtomicUsize::new(0) });
        let pool = Arc::new(ConsumerPool::new(backend.clone(), processor.clone(), 1, 10, 10, 30_000));

        let cancel = CancellationToken::new();
        let messages = backend.read("consumer-0", 10, 10).await.unwrap();
        pool.handle_batch("consumer-0", messages).await;
        cancel.cancel();

        assert_eq!(processor.count.load(Ordering::SeqCst), 2);
    }
}
