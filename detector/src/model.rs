//! Shared entity types passed between pipeline stages.
//!
//! These mirror the wire records written to the durable stream and the two
//! flat-file logs (Delta Log, Touch Log), plus the in-memory state the
//! detection stages build from them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

/// Rent charged when an associated token account is created mid-transaction.
/// Subtracted out of a fee payer's SOL delta so account creation doesn't read
/// as a swap leg.
pub const ATA_RENT_LAMPORTS: i64 = 2_039_280;

/// Rent charged when a bare system account is created mid-transaction.
pub const ACCOUNT_RENT_LAMPORTS: i64 = 890_880;

pub fn quote_mints() -> HashSet<&'static str> {
    [WSOL_MINT, USDC_MINT, USDT_MINT].into_iter().collect()
}

/// Raw transaction data as it arrives from the subscription adapter, before
/// delta extraction. Account balances are indexed positionally the way
/// Yellowstone reports them (pre/post arrays aligned with `account_keys`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee_payer: String,
    pub fee_lamports: u64,
    pub account_keys: Vec<String>,
    pub pre_sol_balances: Vec<u64>,
    pub post_sol_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    pub programs_invoked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    pub account_index: u32,
    pub owner: String,
    pub mint: String,
    pub amount: u64,
    pub decimals: u8,
}

/// Swap side inferred for a wallet in a given transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapSide {
    Buy,
    Sell,
}

/// A decoded balance-delta record, the output of the Delta Builder and the
/// unit stored in the Delta Log for later backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxDeltaRecord {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee_payer: String,
    pub programs_invoked: Vec<String>,
    /// (owner, mint) -> signed token amount change, raw units (not decimal-adjusted)
    pub token_deltas: Vec<((String, String), i64)>,
    /// account -> signed lamport change
    pub sol_deltas: Vec<(String, i64)>,
    pub mints_touched: Vec<String>,
    pub tx_fee: u64,
    pub accounts_created: u32,
}

/// A touch event recorded for every transaction that references a mint,
/// regardless of whether a swap was inferred. Stored only in the Touch Log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintTouchEvent {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee_payer: String,
    pub mints_touched: Vec<String>,
    pub programs_invoked: Vec<String>,
    pub compute_units: Option<u64>,
}

/// A single venue/side/amount candidate produced while scanning a
/// transaction's deltas for swap-shaped patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapCandidate {
    pub user_wallet: String,
    pub side: SwapSide,
    pub base_mint: String,
    pub base_amount: u64,
    pub quote_mint: String,
    pub quote_amount: u64,
    pub confidence: f64,
}

/// The winning inference for a transaction: the highest-confidence
/// `SwapCandidate`, resolved against a known venue program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub venue: String,
    pub user_wallet: String,
    pub side: SwapSide,
    pub base_mint: String,
    pub base_amount: u64,
    pub quote_mint: String,
    pub quote_amount: u64,
    pub confidence: f64,
    pub route_depth: u32,
}

/// Rolling window statistics for a single mint, as produced by the counter
/// store for one window (5m or 1h).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollingStats {
    pub buy_count: u64,
    pub sell_count: u64,
    pub unique_buyers: u64,
    pub unique_sellers: u64,
    pub buy_volume_sol: f64,
    pub sell_volume_sol: f64,
    pub avg_buy_size_sol: f64,
    pub buy_sell_ratio: f64,
    pub top_3_buyers_volume_share: f64,
    pub new_wallet_pct: f64,
}

impl RollingStats {
    /// Flatten into the field-name map the trigger evaluator matches
    /// conditions against, suffixed with the window tag (`_5m` or `_1h`).
    pub fn to_field_map(&self, window_suffix: &str) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert(format!("buy_count{}", window_suffix), self.buy_count as f64);
        m.insert(format!("sell_count{}", window_suffix), self.sell_count as f64);
        m.insert(format!("unique_buyers{}", window_suffix), self.unique_buyers as f64);
        m.insert(format!("unique_sellers{}", window_suffix), self.unique_sellers as f64);
        m.insert(format!("buy_volume_sol{}", window_suffix), self.buy_volume_sol);
        m.insert(format!("avg_buy_size{}", window_suffix), self.avg_buy_size_sol);
        m.insert(format!("buy_sell_ratio{}", window_suffix), self.buy_sell_ratio);
        m.insert(format!("top_3_buyers_volume_share{}", window_suffix), self.top_3_buyers_volume_share);
        m.insert(format!("new_wallet_pct{}", window_suffix), self.new_wallet_pct);
        m
    }
}

/// Tier state machine position for a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenTier {
    Cold,
    Warm,
    Hot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenProfile {
    pub mint: String,
    pub state: TokenTier,
    pub first_seen: i64,
    pub last_seen: i64,
    pub became_hot_at: Option<i64>,
    pub total_buys: u64,
    pub total_sells: u64,
    pub total_volume_sol: f64,
    pub unique_buyers: u64,
    pub unique_sellers: u64,
    pub trigger_reason: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: u8,
    pub market_cap_usd: Option<f64>,
}

impl TokenProfile {
    pub fn new(mint: impl Into<String>, now: i64) -> Self {
        Self {
            mint: mint.into(),
            state: TokenTier::Cold,
            first_seen: now,
            last_seen: now,
            became_hot_at: None,
            total_buys: 0,
            total_sells: 0,
            total_volume_sol: 0.0,
            unique_buyers: 0,
            unique_sellers: 0,
            trigger_reason: None,
            name: None,
            symbol: None,
            decimals: 9,
            market_cap_usd: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletProfile {
    pub address: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub total_buys: u64,
    pub total_sells: u64,
    pub total_volume_sol: f64,
    pub tokens_traded: Vec<String>,
    pub cluster_id: Option<String>,
    pub cluster_size: u32,
    pub funded_by: Option<String>,
}

/// A coordinated-cluster of wallets, persisted once a mint goes HOT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub mint: String,
    pub wallets: Vec<String>,
    pub total_volume_sol: f64,
}

/// An outbound alert, the product of a successful trigger match + score.
/// Exactly one is created per (mint, HOT-promotion-instance) - callers must
/// only construct this after confirming the promotion was not a re-trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub mint: String,
    pub trigger_reason: String,
    pub coordination_score: f64,
    pub confidence: f64,
    pub risk_level: String,
    pub summary: String,
    pub top_buyers: Vec<(String, f64)>,
    pub cluster_summary: String,
    pub market_cap_usd: Option<f64>,
    pub enrichment_degraded: bool,
    pub created_at: i64,
    /// Per-channel delivery-success flags, filled in after dispatch.
    pub delivery: HashMap<String, bool>,
}

/// Backpressure degradation level, derived from consumer lag and stream length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradationMode {
    Normal,
    Degraded,
    Critical,
}
