//! Shared subscription-adapter interface.
//!
//! The live implementation (a Yellowstone gRPC subscriber) lives in the
//! `ingest` crate, which depends on this crate for `TransactionUpdate` and
//! this trait so both binaries agree on the boundary at compile time rather
//! than by convention. Keeping the trait here also lets the detector's own
//! integration tests drive the pipeline end to end with a synthetic feed
//! instead of a live validator connection.

use crate::model::TransactionUpdate;
use anyhow::Result;
use async_trait::async_trait;

/// A source of decoded transaction updates. `next_update` returns `Ok(None)`
/// only when the underlying feed has been exhausted (synthetic adapters,
/// replay files); a live subscription should reconnect internally rather
/// than surface exhaustion.
#[async_trait]
pub trait SubscriptionAdapter: Send {
    async fn next_update(&mut self) -> Result<Option<TransactionUpdate>>;
}

/// Replays a fixed, pre-built sequence of updates, then reports exhaustion.
/// Used by detector integration tests and by `ingest`'s own tests in place
/// of a live yellowstone-grpc connection.
pub struct SyntheticAdapter {
    queue: std::collections::VecDeque<TransactionUpdate>,
}

impl SyntheticAdapter {
    pub fn new(updates: Vec<TransactionUpdate>) -> Self {
        Self { queue: updates.into() }
    }
}

#[async_trait]
impl SubscriptionAdapter for SyntheticAdapter {
    async fn next_update(&mut self) -> Result<Option<TransactionUpdate>> {
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update(signature: &str) -> TransactionUpdate {
        TransactionUpdate {
            signature: signature.to_string(),
            slot: 1,
            block_time: Some(0),
            fee_payer: "fee_payer".to_string(),
            fee_lamports: 5000,
            account_keys: vec![],
            pre_sol_balances: vec![],
            post_sol_balances: vec![],
            pre_token_balances: vec![],
            post_token_balances: vec![],
            programs_invoked: vec![],
        }
    }

    #[tokio::test]
    async fn synthetic_adapter_replays_then_exhausts() {
        let mut adapter = SyntheticAdapter::new(vec![sample_update("a"), sample_update("b")]);
        assert_eq!(adapter.next_update().await.unwrap().unwrap().signature, "a");
        assert_eq!(adapter.next_update().await.unwrap().unwrap().signature, "b");
        assert!(adapter.next_update().await.unwrap().is_none());
    }
}
