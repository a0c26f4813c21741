//! Ingest Writer: serializes a decoded `TransactionUpdate` and appends it to
//! the durable stream (§2, §4.3 "Writer contract"). The length cap itself is
//! enforced approximately by the stream backend's `XADD ... MAXLEN ~`, not
//! here.

use anyhow::{Context, Result};
use detector::model::TransactionUpdate;
use detector::stream::StreamBackend;
use detector::wire;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct IngestWriter {
    backend: Arc<dyn StreamBackend>,
    pushed: AtomicU64,
    failed: AtomicU64,
}

impl IngestWriter {
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        Self { backend, pushed: AtomicU64::new(0), failed: AtomicU64::new(0) }
    }

    /// Encodes and appends one update, returning the stream-assigned id.
    pub async fn push(&self, update: &TransactionUpdate) -> Result<String> {
        let payload = wire::encode_record(update).context("failed to encode transaction update")?;
        match self.backend.push(&payload).await {
            Ok(id) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(id)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e).context("failed to append to durable stream")
            }
        }
    }

    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector::stream::backend::InMemoryStreamBackend;

    fn sample_update() -> TransactionUpdate {
        TransactionUpdate {
            signature: "sig1".to_string(),
            slot: 1,
            block_time: Some(0),
            fee_payer: "payer".to_string(),
            fee_lamports: 5000,
            account_keys: vec!["payer".to_string()],
            pre_sol_balances: vec![1_000_000],
            post_sol_balances: vec![995_000],
            pre_token_balances: vec![],
            post_token_balances: vec![],
            programs_invoked: vec![],
        }
    }

    #[tokio::test]
    async fn pushes_encoded_update_and_counts_it() {
        let backend: Arc<dyn StreamBackend> = Arc::new(InMemoryStreamBackend::new());
        let writer = IngestWriter::new(backend.clone());
        let id = writer.push(&sample_update()).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(writer.pushed_count(), 1);
        assert_eq!(backend.len().await.unwrap(), 1);
    }
}
