//! Decodes a raw `SubscribeUpdate` transaction payload into a
//! [`detector::model::TransactionUpdate`], without ever inspecting
//! instruction data for program-specific semantics (§1: "without relying on
//! program-specific parsers"). Only structural facts are extracted: account
//! keys (including address-lookup-table loaded addresses), pre/post SOL and
//! token balances, the transaction fee, and the set of invoked program ids
//! (top-level and inner).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use detector::model::TransactionUpdate;
use detector::subscription::SubscriptionAdapter;
use futures::Stream;
use std::pin::Pin;
use tokio::sync::mpsc;
use yellowstone_grpc_proto::geyser::{subscribe_update::UpdateOneof, SubscribeRequest, SubscribeUpdateTransaction};

use crate::config::GrpcConfig;
use crate::grpc::YellowstoneClient;

/// Decodes one `SubscribeUpdateTransaction` into a `TransactionUpdate`.
/// Returns `Ok(None)` for a structurally incomplete update (missing
/// transaction or meta envelope) rather than erroring — the Subscription
/// Adapter's failure policy mirrors the Delta Builder's: log, count, skip.
pub fn decode_transaction_update(update: SubscribeUpdateTransaction) -> Result<Option<TransactionUpdate>> {
    let slot = update.slot;
    let info = match update.transaction {
        Some(info) => info,
        None => return Ok(None),
    };
    if info.is_vote {
        return Ok(None);
    }

    let tx = info.transaction.ok_or_else(|| anyhow!("transaction envelope missing"))?;
    let meta = info.meta.ok_or_else(|| anyhow!("transaction meta missing"))?;
    let message = tx.message.ok_or_else(|| anyhow!("transaction message missing"))?;

    let signature = tx
        .signatures
        .first()
        .map(|s| bs58::encode(s).into_string())
        .ok_or_else(|| anyhow!("transaction has no signatures"))?;

    let mut account_keys: Vec<String> = message.account_keys.iter().map(|k| bs58::encode(k).into_string()).collect();
    account_keys.extend(meta.loaded_writable_addresses.iter().map(|k| bs58::encode(k).into_string()));
    account_keys.extend(meta.loaded_readonly_addresses.iter().map(|k| bs58::encode(k).into_string()));

    if account_keys.is_empty() {
        return Err(anyhow!("empty account key list"));
    }
    let fee_payer = account_keys[0].clone();

    let pre_token_balances = meta
        .pre_token_balances
        .iter()
        .filter_map(|tb| to_token_balance(tb))
        .collect();
    let post_token_balances = meta
        .post_token_balances
        .iter()
        .filter_map(|tb| to_token_balance(tb))
        .collect();

    let mut programs_invoked: Vec<String> = Vec::new();
    for ix in &message.instructions {
        if let Some(id) = account_keys.get(ix.program_id_index as usize) {
            programs_invoked.push(id.clone());
        }
    }
    for inner in &meta.inner_instructions {
        for ix in &inner.instructions {
            if let Some(id) = account_keys.get(ix.program_id_index as usize) {
                programs_invoked.push(id.clone());
            }
        }
    }
    programs_invoked.sort();
    programs_invoked.dedup();

    Ok(Some(TransactionUpdate {
        signature,
        slot,
        // The upstream stream carries no block-time on a transaction update
        // (see SPEC_FULL §9 open question); wall-clock time at decode is the
        // documented proxy, same as `data_mining::main`.
        block_time: Some(Utc::now().timestamp()),
        fee_payer,
        fee_lamports: meta.fee,
        account_keys,
        pre_sol_balances: meta.pre_balances,
        post_sol_balances: meta.post_balances,
        pre_token_balances,
        post_token_balances,
        programs_invoked,
    }))
}

fn to_token_balance(
    tb: &yellowstone_grpc_proto::solana::storage::confirmed_block::TokenBalance,
) -> Option<detector::model::TokenBalance> {
    let ui = tb.ui_token_amount.as_ref()?;
    let amount: u64 = ui.amount.parse().unwrap_or(0);
    Some(detector::model::TokenBalance {
        account_index: tb.account_index,
        owner: tb.owner.clone(),
        mint: tb.mint.clone(),
        amount,
        decimals: ui.decimals as u8,
    })
}

/// Live `SubscriptionAdapter` backed by a Yellowstone gRPC connection.
/// Reconnects with growing backoff (1s .. 60s cap, §7) whenever the
/// underlying stream ends or errors; malformed individual updates are
/// logged and skipped rather than tearing down the connection.
pub struct YellowstoneSubscriptionAdapter {
    client: YellowstoneClient,
    account_include: Vec<String>,
    ping_interval: std::time::Duration,
    inner: Option<Pin<Box<dyn Stream<Item = Result<UpdateOneof>> + Send>>>,
    ping_tx: Option<mpsc::UnboundedSender<SubscribeRequest>>,
    reconnect_backoff: std::time::Duration,
}

const RECONNECT_BACKOFF_MIN: std::time::Duration = std::time::Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: std::time::Duration = std::time::Duration::from_secs(60);

impl YellowstoneSubscriptionAdapter {
    pub fn new(grpc: &GrpcConfig, account_include: Vec<String>) -> Self {
        Self {
            client: YellowstoneClient::new(grpc),
            account_include,
            ping_interval: std::time::Duration::from_secs(grpc.ping_interval_secs),
            inner: None,
            ping_tx: None,
            reconnect_backoff: RECONNECT_BACKOFF_MIN,
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        let request = self.client.create_subscription_request(&self.account_include);
        let (tx, stream) = self.client.connect_and_subscribe(request).await?;
        self.spawn_pinger(tx.clone());
        self.ping_tx = Some(tx);
        self.inner = Some(Box::pin(stream));
        self.reconnect_backoff = RECONNECT_BACKOFF_MIN;
        Ok(())
    }

    fn spawn_pinger(&self, tx: mpsc::UnboundedSender<SubscribeRequest>) {
        let interval = self.ping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if tx.send(YellowstoneClient::ping_request()).is_err() {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl SubscriptionAdapter for YellowstoneSubscriptionAdapter {
    async fn next_update(&mut self) -> Result<Option<TransactionUpdate>> {
        loop {
            if self.inner.is_none() {
                if let Err(e) = self.reconnect().await {
                    tracing::warn!(error = %e, backoff_secs = self.reconnect_backoff.as_secs(), "reconnect failed, backing off");
                    tokio::time::sleep(self.reconnect_backoff).await;
                    self.reconnect_backoff = (self.reconnect_backoff * 2).min(RECONNECT_BACKOFF_MAX);
                    continue;
                }
            }

            let stream = self.inner.as_mut().expect("just reconnected");
            match futures::StreamExt::next(stream).await {
                Some(Ok(UpdateOneof::Transaction(tx))) => match decode_transaction_update(tx) {
                    Ok(Some(update)) => return Ok(Some(update)),
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed transaction update, skipping");
                        continue;
                    }
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "subscription stream error, reconnecting");
                    self.inner = None;
                    continue;
                }
                None => {
                    tracing::warn!("subscription stream ended, reconnecting");
                    self.inner = None;
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yellowstone_grpc_proto::geyser::{
        SubscribeUpdateTransactionInfo,
    };
    use yellowstone_grpc_proto::solana::storage::confirmed_block::{
        Message, Transaction, TransactionStatusMeta,
    };

    fn base_meta() -> TransactionStatusMeta {
        TransactionStatusMeta {
            err: None,
            fee: 5000,
            pre_balances: vec![10_000_000_000, 0],
            post_balances: vec![8_995_000_000, 2_039_280],
            inner_instructions: vec![],
            inner_instructions_none: false,
            log_messages: vec![],
            log_messages_none: false,
            pre_token_balances: vec![],
            post_token_balances: vec![],
            rewards: vec![],
            loaded_writable_addresses: vec![],
            loaded_readonly_addresses: vec![],
            return_data: None,
            return_data_none: true,
            compute_units_consumed: Some(50_000),
        }
    }

    fn base_update(meta: TransactionStatusMeta) -> SubscribeUpdateTransaction {
        SubscribeUpdateTransaction {
            transaction: Some(SubscribeUpdateTransactionInfo {
                signature: vec![1; 64],
                is_vote: false,
                transaction: Some(Transaction {
                    signatures: vec![vec![1; 64]],
                    message: Some(Message {
                        header: None,
                        account_keys: vec![vec![9; 32], vec![8; 32]],
                        recent_blockhash: vec![0; 32],
                        instructions: vec![],
                        versioned: false,
                        address_table_lookups: vec![],
                    }),
                }),
                meta: Some(meta),
                index: 0,
            }),
            slot: 42,
        }
    }

    #[test]
    fn decodes_minimal_transaction() {
        let update = base_update(base_meta());
        let decoded = decode_transaction_update(update).unwrap().unwrap();
        assert_eq!(decoded.slot, 42);
        assert_eq!(decoded.fee_lamports, 5000);
        assert_eq!(decoded.account_keys.len(), 2);
        assert_eq!(decoded.pre_sol_balances, vec![10_000_000_000, 0]);
    }

    #[test]
    fn skips_vote_transactions() {
        let mut update = base_update(base_meta());
        update.transaction.as_mut().unwrap().is_vote = true;
        assert!(decode_transaction_update(update).unwrap().is_none());
    }

    #[test]
    fn rejects_update_with_no_transaction_envelope() {
        let update = SubscribeUpdateTransaction { transaction: None, slot: 1 };
        assert!(decode_transaction_update(update).unwrap().is_none());
    }
}
