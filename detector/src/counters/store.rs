//! `CounterStore`: the detection pipeline's view onto rolling per-mint
//! stats. Wraps a `CounterBackend` with a short-lived (1s default) memoized
//! cache, since the trigger evaluator re-reads the same mint's stats on
//! every matching transaction within a burst.

use super::backend::{BucketTotals, CounterBackend, SwapRecord};
use crate::model::RollingStats;
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedStats {
    stats: RollingStats,
    cached_at: Instant,
}

pub struct CounterStore {
    backend: Arc<dyn CounterBackend>,
    short_window_secs: u64,
    short_bucket_secs: u64,
    long_window_secs: u64,
    long_bucket_secs: u64,
    cache_ttl: Duration,
    cache: DashMap<(String, u64), CachedStats>,
}

impl CounterStore {
    pub fn new(
        backend: Arc<dyn CounterBackend>,
        short_window_secs: u64,
        short_bucket_secs: u64,
        long_window_secs: u64,
        long_bucket_secs: u64,
        cache_ttl_ms: u64,
    ) -> Self {
        Self {
            backend,
            short_window_secs,
            short_bucket_secs,
            long_window_secs,
            long_bucket_secs,
            cache_ttl: Duration::from_millis(cache_ttl_ms),
            cache: DashMap::new(),
        }
    }

    pub async fn record_swap(&self, record: SwapRecord<'_>, now: i64) -> Result<bool> {
        let is_new = self.backend.record_swap(record, now).await?;
        self.cache.remove(&(record.mint.to_string(), self.short_window_secs));
        self.cache.remove(&(record.mint.to_string(), self.long_window_secs));
        Ok(is_new)
    }

    pub async fn get_stats(&self, mint: &str, window_seconds: u64, now: i64) -> Result<RollingStats> {
        let cache_key = (mint.to_string(), window_seconds);
        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.cached_at.elapsed() < self.cache_ttl {
                return Ok(cached.stats.clone());
            }
        }

        let bucket_secs = if window_seconds == self.short_window_secs {
            self.short_bucket_secs
        } else {
            self.long_bucket_secs
        };
        let num_buckets = (window_seconds / bucket_secs).max(1);

        let top_buyers = self.backend.top_buyers_by_volume(mint, 3).await?;
        let totals = self.backend.read_window(mint, bucket_secs, num_buckets, now).await?;
        let stats = Self::totals_to_stats(&totals, &top_buyers);

        self.cache.insert(cache_key, CachedStats { stats: stats.clone(), cached_at: Instant::now() });
        Ok(stats)
    }

    pub async fn top_buyers_by_volume(&self, mint: &str, n: usize) -> Result<Vec<(String, f64)>> {
        self.backend.top_buyers_by_volume(mint, n).await
    }

    pub async fn get_wallet_first_seen(&self, wallet: &str) -> Result<Option<i64>> {
        self.backend.get_wallet_first_seen(wallet).await
    }

    /// `top_3_buyers_volume_share` is concentration of *wallet* volume, not
    /// per-swap size: the top 3 wallets by total volume over their share of
    /// all volume moved, matching the per-wallet `wallet_vol` tracking rather
    /// than the flat list of individual buy sizes.
    fn totals_to_stats(totals: &BucketTotals, top_buyers_by_volume: &[(String, f64)]) -> RollingStats {
        let avg_buy_size_sol = if totals.buys > 0 {
            totals.buy_volume_sol / totals.buys as f64
        } else {
            0.0
        };

        let buy_sell_ratio = if totals.sells == 0 {
            if totals.buys > 0 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            totals.buys as f64 / totals.sells as f64
        };

        let new_wallet_pct = if totals.buys + totals.sells > 0 {
            totals.new_wallets as f64 / (totals.buys + totals.sells) as f64
        } else {
            0.0
        };

        let total_volume = totals.buy_volume_sol + totals.sell_volume_sol;
        let top3_wallet_volume: f64 = top_buyers_by_volume.iter().take(3).map(|(_, v)| *v).sum();
        let top_3_buyers_volume_share = if total_volume > 0.0 { top3_wallet_volume / total_volume } else { 0.0 };

        RollingStats {
            buy_count: totals.buys,
            sell_count: totals.sells,
            unique_buyers: totals.unique_buyers,
            unique_sellers: totals.unique_sellers,
            buy_volume_sol: totals.buy_volume_sol,
            sell_volume_sol: totals.sell_volume_sol,
            avg_buy_size_sol,
            buy_sell_ratio,
            top_3_buyers_volume_share,
            new_wallet_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_sell_ratio_is_infinite_with_zero_sells() {
        let totals = BucketTotals { buys: 5, sells: 0, buy_volume_sol: 10.0, ..Default::default() };
        let stats = CounterStore::totals_to_stats(&totals, &[]);
        assert!(stats.buy_sell_ratio.is_infinite());
    }

    #[test]
    fn buy_sell_ratio_is_zero_with_no_activity() {
        let totals = BucketTotals::default();
        let stats = CounterStore::totals_to_stats(&totals, &[]);
        assert_eq!(stats.buy_sell_ratio, 0.0);
    }

    #[test]
    fn top_3_share_is_wallet_volume_concentration_not_swap_size() {
        // 25 small buys spread across 5 wallets (5 sol each) - per-swap sizes
        // are tiny and uniform, but per-wallet volume is evenly split 5 ways,
        // so the top-3-of-5 wallets should carry 3/5 of total volume.
        let totals = BucketTotals {
            buys: 25,
            buy_volume_sol: 25.0,
            buy_sizes_sol: vec![1.0; 25],
            ..Default::default()
        };
        let top_buyers = vec![
            ("w1".to_string(), 5.0),
            ("w2".to_string(), 5.0),
            ("w3".to_string(), 5.0),
            ("w4".to_string(), 5.0),
            ("w5".to_string(), 5.0),
        ];
        let stats = CounterStore::totals_to_stats(&totals, &top_buyers);
        assert!((stats.top_3_buyers_volume_share - 0.6).abs() < 1e-9);
    }
}
