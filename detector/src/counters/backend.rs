//! `CounterBackend` trait plus its Redis implementation.
//!
//! Counters are bucketed by wall-clock time so a window's stats are a sum
//! over a handful of fixed-width buckets rather than a sorted set scan. Each
//! bucket key carries a TTL of 3x its own width, so buckets that fall out of
//! every window simply expire instead of needing an explicit sweep.

use crate::model::SwapSide;
use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

#[derive(Debug, Clone, Copy)]
pub struct SwapRecord<'a> {
    pub mint: &'a str,
    pub side: SwapSide,
    pub user_wallet: &'a str,
    pub volume_sol: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BucketTotals {
    pub buys: u64,
    pub sells: u64,
    pub unique_buyers: u64,
    pub unique_sellers: u64,
    pub buy_volume_sol: f64,
    pub sell_volume_sol: f64,
    pub buy_sizes_sol: Vec<f64>,
    pub new_wallets: u64,
}

#[async_trait::async_trait]
pub trait CounterBackend: Send + Sync {
    /// Record one swap into the bucket active at `now` for both the short
    /// and long bucket widths, and mark the wallet's first-seen timestamp if
    /// it hasn't been seen before. Returns whether the wallet was new.
    async fn record_swap(&self, record: SwapRecord<'_>, now: i64) -> Result<bool>;

    /// Sum bucket totals for a mint across `num_buckets` buckets of
    /// `bucket_secs` width, ending at the bucket containing `now`.
    async fn read_window(&self, mint: &str, bucket_secs: u64, num_buckets: u64, now: i64) -> Result<BucketTotals>;

    /// Top-N wallets by volume for a mint (for concentration / cluster input).
    async fn top_buyers_by_volume(&self, mint: &str, n: usize) -> Result<Vec<(String, f64)>>;

    async fn get_wallet_first_seen(&self, wallet: &str) -> Result<Option<i64>>;
}

pub struct RedisCounterBackend {
    conn: ConnectionManager,
    wallet_first_seen_ttl_secs: u64,
}

impl RedisCounterBackend {
    pub fn new(conn: ConnectionManager, wallet_first_seen_ttl_secs: u64) -> Self {
        Self { conn, wallet_first_seen_ttl_secs }
    }

    fn bucket_key(mint: &str, metric: &str, bucket_secs: u64, bucket: i64) -> String {
        format!("{}:{}s:{}:{}", metric, bucket_secs, bucket, mint)
    }

    fn wallet_volume_key(mint: &str) -> String {
        format!("{}:wallet_vol", mint)
    }
}

#[async_trait::async_trait]
impl CounterBackend for RedisCounterBackend {
    async fn record_swap(&self, record: SwapRecord<'_>, now: i64) -> Result<bool> {
        let mut conn = self.conn.clone();

        let is_new_wallet = {
            let key = format!("wallet_first_seen:{}", record.user_wallet);
            let set: bool = conn.set_nx(&key, now).await.context("wallet first-seen SETNX failed")?;
            if set {
                let _: () = conn
                    .expire(&key, self.wallet_first_seen_ttl_secs as i64)
                    .await
                    .context("wallet first-seen EXPIRE failed")?;
            }
            set
        };

        for (bucket_secs, ttl_secs) in [(60u64, 900i64), (300u64, 1800i64)] {
            let bucket = now / bucket_secs as i64;
            let side_metric = match record.side {
                SwapSide::Buy => "buys",
                SwapSide::Sell => "sells",
            };
            let hll_metric = match record.side {
                SwapSide::Buy => "buyers",
                SwapSide::Sell => "sellers",
            };

            let count_key = Self::bucket_key(record.mint, side_metric, bucket_secs, bucket);
            let hll_key = Self::bucket_key(record.mint, hll_metric, bucket_secs, bucket);
            let volume_key = Self::bucket_key(record.mint, "volume", bucket_secs, bucket);

            let mut pipe = redis::pipe();
            pipe.cmd("INCR").arg(&count_key).ignore();
            pipe.cmd("EXPIRE").arg(&count_key).arg(ttl_secs).ignore();
            pipe.cmd("PFADD").arg(&hll_key).arg(record.user_wallet).ignore();
            pipe.cmd("EXPIRE").arg(&hll_key).arg(ttl_secs).ignore();
            pipe.cmd("INCRBYFLOAT").arg(&volume_key).arg(record.volume_sol).ignore();
            pipe.cmd("EXPIRE").arg(&volume_key).arg(ttl_secs).ignore();

            if record.side == SwapSide::Buy {
                let sizes_key = Self::bucket_key(record.mint, "buy_sizes", bucket_secs, bucket);
                pipe.cmd("RPUSH").arg(&sizes_key).arg(record.volume_sol).ignore();
                pipe.cmd("EXPIRE").arg(&sizes_key).arg(ttl_secs).ignore();
            }

            if is_new_wallet {
                let new_wallets_key = Self::bucket_key(record.mint, "new_wallets", bucket_secs, bucket);
                pipe.cmd("INCR").arg(&new_wallets_key).ignore();
                pipe.cmd("EXPIRE").arg(&new_wallets_key).arg(ttl_secs).ignore();
            }

            pipe.query_async(&mut conn).await.context("counter bucket pipeline failed")?;
        }

        let wallet_vol_key = Self::wallet_volume_key(record.mint);
        let _: () = conn
            .zincr(&wallet_vol_key, record.user_wallet, record.volume_sol)
            .await
            .context("wallet volume ZINCRBY failed")?;

        Ok(is_new_wallet)
    }

    async fn read_window(&self, mint: &str, bucket_secs: u64, num_buckets: u64, now: i64) -> Result<BucketTotals> {
        let mut conn = self.conn.clone();
        let current_bucket = now / bucket_secs as i64;

        let mut totals = BucketTotals::default();
        let mut buyer_hll_keys = Vec::new();
        let mut seller_hll_keys = Vec::new();

        for i in 0..num_buckets {
            let bucket = current_bucket - i as i64;
            let buys_key = Self::bucket_key(mint, "buys", bucket_secs, bucket);
            let sells_key = Self::bucket_key(mint, "sells", bucket_secs, bucket);
            let volume_key = Self::bucket_key(mint, "volume", bucket_secs, bucket);
            let sizes_key = Self::bucket_key(mint, "buy_sizes", bucket_secs, bucket);
            let new_wallets_key = Self::bucket_key(mint, "new_wallets", bucket_secs, bucket);
            buyer_hll_keys.push(Self::bucket_key(mint, "buyers", bucket_secs, bucket));
            seller_hll_keys.push(Self::bucket_key(mint, "sellers", bucket_secs, bucket));

            let (buys, sells, volume, sizes, new_wallets): (Option<u64>, Option<u64>, Option<f64>, Vec<f64>, Option<u64>) = redis::pipe()
                .get(&buys_key)
                .get(&sells_key)
                .get(&volume_key)
                .lrange(&sizes_key, 0, -1)
                .get(&new_wallets_key)
                .query_async(&mut conn)
                .await
                .context("counter window read pipeline failed")?;

            totals.buys += buys.unwrap_or(0);
            totals.sells += sells.unwrap_or(0);
            totals.buy_volume_sol += volume.unwrap_or(0.0).max(0.0);
            totals.buy_sizes_sol.extend(sizes);
            totals.new_wallets += new_wallets.unwrap_or(0);
        }

        totals.unique_buyers = pfcount_union(&mut conn, &buyer_hll_keys).await?;
        totals.unique_sellers = pfcount_union(&mut conn, &seller_hll_keys).await?;

        Ok(totals)
    }

    async fn top_buyers_by_volume(&self, mint: &str, n: usize) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let key = Self::wallet_volume_key(mint);
        let raw: Vec<(String, f64)> = conn
            .zrevrange_withscores(&key, 0, n.saturating_sub(1) as isize)
            .await
            .context("ZREVRANGE WITHSCORES failed")?;
        Ok(raw)
    }

    async fn get_wallet_first_seen(&self, wallet: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let key = format!("wallet_first_seen:{}", wallet);
        let value: Option<i64> = conn.get(&key).await.context("wallet first-seen GET failed")?;
        Ok(value)
    }
}

async fn pfcount_union(conn: &mut ConnectionManager, keys: &[String]) -> Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let count: u64 = conn.pfcount(keys).await.context("PFCOUNT failed")?;
    Ok(count)
}

/// In-memory test double so the trigger/scoring pipeline can be exercised
/// without a live Redis instance. Keeps every swap in a flat per-mint vec
/// rather than bucketing by wall-clock time; `read_window` filters by the
/// window's time span directly instead of summing discrete buckets, which is
/// an equivalent view for a backend nothing else reads from concurrently.
pub struct InMemoryCounterBackend {
    state: std::sync::Mutex<InMemoryCounterState>,
}

#[derive(Default)]
struct InMemoryCounterState {
    swaps: Vec<(String, i64, SwapRecordOwned)>,
    wallet_first_seen: std::collections::HashMap<String, i64>,
    wallet_volume: std::collections::HashMap<String, std::collections::HashMap<String, f64>>,
}

#[derive(Clone)]
struct SwapRecordOwned {
    side: SwapSide,
    user_wallet: String,
    volume_sol: f64,
}

impl InMemoryCounterBackend {
    pub fn new() -> Self {
        Self { state: std::sync::Mutex::new(InMemoryCounterState::default()) }
    }
}

impl Default for InMemoryCounterBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CounterBackend for InMemoryCounterBackend {
    async fn record_swap(&self, record: SwapRecord<'_>, now: i64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();

        let is_new_wallet = !state.wallet_first_seen.contains_key(record.user_wallet);
        if is_new_wallet {
            state.wallet_first_seen.insert(record.user_wallet.to_string(), now);
        }

        state.swaps.push((
            record.mint.to_string(),
            now,
            SwapRecordOwned { side: record.side, user_wallet: record.user_wallet.to_string(), volume_sol: record.volume_sol },
        ));

        state
            .wallet_volume
            .entry(record.mint.to_string())
            .or_default()
            .entry(record.user_wallet.to_string())
            .and_modify(|v| *v += record.volume_sol)
            .or_insert(record.volume_sol);

        Ok(is_new_wallet)
    }

    async fn read_window(&self, mint: &str, bucket_secs: u64, num_buckets: u64, now: i64) -> Result<BucketTotals> {
        let state = self.state.lock().unwrap();
        let window_secs = bucket_secs * num_buckets;
        let cutoff = now - window_secs as i64;

        let mut totals = BucketTotals::default();
        let mut buyers = std::collections::HashSet::new();
        let mut sellers = std::collections::HashSet::new();

        for (swap_mint, at, record) in &state.swaps {
            if swap_mint != mint || *at <= cutoff || *at > now {
                continue;
            }
            match record.side {
                SwapSide::Buy => {
                    totals.buys += 1;
                    totals.buy_volume_sol += record.volume_sol;
                    totals.buy_sizes_sol.push(record.volume_sol);
                    buyers.insert(record.user_wallet.clone());
                }
                SwapSide::Sell => {
                    totals.sells += 1;
                    totals.sell_volume_sol += record.volume_sol;
                    sellers.insert(record.user_wallet.clone());
                }
            }
            if state.wallet_first_seen.get(&record.user_wallet) == Some(at) {
                totals.new_wallets += 1;
            }
        }

        totals.unique_buyers = buyers.len() as u64;
        totals.unique_sellers = sellers.len() as u64;
        Ok(totals)
    }

    async fn top_buyers_by_volume(&self, mint: &str, n: usize) -> Result<Vec<(String, f64)>> {
        let state = self.state.lock().unwrap();
        let mut ranked: Vec<(String, f64)> = state
            .wallet_volume
            .get(mint)
            .map(|m| m.iter().map(|(w, v)| (w.clone(), *v)).collect())
            .unwrap_or_default();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        ranked.truncate(n);
        Ok(ranked)
    }

    async fn get_wallet_first_seen(&self, wallet: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().unwrap().wallet_first_seen.get(wallet).copied())
    }
}

#[cfg(test)]
mod in_memory_tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back_a_window() {
        let backend = InMemoryCounterBackend::new();
        backend
            .record_swap(SwapRecord { mint: "MEME", side: SwapSide::Buy, user_wallet: "w1", volume_sol: 1.5 }, 1000)
            .await
            .unwrap();
        backend
            .record_swap(SwapRecord { mint: "MEME", side: SwapSide::Sell, user_wallet: "w2", volume_sol: 0.5 }, 1010)
            .await
            .unwrap();

        let totals = backend.read_window("MEME", 60, 5, 1010).await.unwrap();
        assert_eq!(totals.buys, 1);
        assert_eq!(totals.sells, 1);
        assert_eq!(totals.unique_buyers, 1);
    }

    #[tokio::test]
    async fn swaps_outside_the_window_are_excluded() {
        let backend = InMemoryCounterBackend::new();
        backend
            .record_swap(SwapRecord { mint: "MEME", side: SwapSide::Buy, user_wallet: "w1", volume_sol: 1.0 }, 0)
            .await
            .unwrap();

        let totals = backend.read_window("MEME", 60, 5, 10_000).await.unwrap();
        assert_eq!(totals.buys, 0);
    }

    #[tokio::test]
    async fn first_seen_is_recorded_once() {
        let backend = InMemoryCounterBackend::new();
        let first = backend
            .record_swap(SwapRecord { mint: "MEME", side: SwapSide::Buy, user_wallet: "w1", volume_sol: 1.0 }, 100)
            .await
            .unwrap();
        let second = backend
            .record_swap(SwapRecord { mint: "MEME", side: SwapSide::Buy, user_wallet: "w1", volume_sol: 1.0 }, 200)
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }
}
