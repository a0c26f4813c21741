//! Enrichment RPC client: wallet/signature lookups used to build the
//! funding graph for cluster detection, gated by a daily credit budget so a
//! burst of HOT tokens can't blow the month's RPC bill in an afternoon.
//!
//! Costs are fixed per operation (signature list, transaction fetch,
//! enhanced wallet query). Once spend crosses `degraded_budget_fraction` of
//! the daily budget, only the cheapest operations continue; once the budget
//! is exhausted, enrichment stops until the daily reset.

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub const COST_SIGNATURES_LIST: u64 = 10;
pub const COST_TX_FETCH: u64 = 10;
pub const COST_ENHANCED_WALLET_QUERY: u64 = 100;

pub struct EnrichmentClient {
    http: Client,
    rpc_url: String,
    daily_budget: u64,
    degraded_fraction: f64,
    spent_today: AtomicU64,
    day_started_at: AtomicI64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BudgetState {
    Normal,
    Degraded,
    Exhausted,
}

impl EnrichmentClient {
    pub fn new(rpc_url: impl Into<String>, daily_budget: u64, degraded_fraction: f64) -> Self {
        Self {
            http: Client::new(),
            rpc_url: rpc_url.into(),
            daily_budget,
            degraded_fraction,
            spent_today: AtomicU64::new(0),
            day_started_at: AtomicI64::new(today_start()),
        }
    }

    fn roll_day_if_needed(&self) {
        let today = today_start();
        if self.day_started_at.swap(today, Ordering::SeqCst) != today {
            self.spent_today.store(0, Ordering::SeqCst);
        } else {
            self.day_started_at.store(today, Ordering::SeqCst);
        }
    }

    pub fn budget_state(&self) -> BudgetState {
        self.roll_day_if_needed();
        let spent = self.spent_today.load(Ordering::SeqCst);
        if spent >= self.daily_budget {
            BudgetState::Exhausted
        } else if spent as f64 >= self.daily_budget as f64 * self.degraded_fraction {
            BudgetState::Degraded
        } else {
            BudgetState::Normal
        }
    }

    fn try_spend(&self, cost: u64) -> bool {
        self.roll_day_if_needed();
        self.spent_today
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |spent| {
                if spent + cost <= self.daily_budget {
                    Some(spent + cost)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Fetch the list of signatures touching `wallet`. The cheapest
    /// enrichment operation, so it's the one still allowed in DEGRADED mode.
    pub async fn get_signatures_for_address(&self, wallet: &str, limit: usize) -> Result<Vec<String>> {
        if !self.try_spend(COST_SIGNATURES_LIST) {
            anyhow::bail!("enrichment daily credit budget exhausted");
        }

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSignaturesForAddress",
            "params": [wallet, {"limit": limit}],
        });
        let response: serde_json::Value = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .context("getSignaturesForAddress request failed")?
            .json()
            .await
            .context("getSignaturesForAddress response was not valid JSON")?;

        let signatures = response["result"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v["signature"].as_str().map(String::from)).collect())
            .unwrap_or_default();
        Ok(signatures)
    }

    /// Resolve a funding parent (the earliest SOL transfer into `wallet`).
    /// Skipped entirely once the budget is DEGRADED or worse, since it costs
    /// the most of any enrichment operation.
    pub async fn get_funding_parent(&self, wallet: &str) -> Result<Option<String>> {
        if self.budget_state() != BudgetState::Normal {
            return Ok(None);
        }
        if !self.try_spend(COST_ENHANCED_WALLET_QUERY) {
            return Ok(None);
        }

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSignaturesForAddress",
            "params": [wallet, {"limit": 1000}],
        });
        let response: serde_json::Value = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .context("funding-parent lookup request failed")?
            .json()
            .await
            .context("funding-parent lookup response was not valid JSON")?;

        let earliest = response["result"]
            .as_array()
            .and_then(|arr| arr.last())
            .and_then(|entry| entry["signature"].as_str())
            .map(String::from);

        Ok(earliest)
    }
}

fn today_start() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    now - (now % 86400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_state_transitions_from_normal_to_exhausted() {
        let client = EnrichmentClient::new("http://localhost", 100, 0.8);
        assert_eq!(client.budget_state(), BudgetState::Normal);

        assert!(client.try_spend(85));
        assert_eq!(client.budget_state(), BudgetState::Degraded);

        assert!(!client.try_spend(20));
        assert!(client.try_spend(15));
        assert_eq!(client.budget_state(), BudgetState::Exhausted);
    }

    #[test]
    fn try_spend_rejects_when_it_would_exceed_budget() {
        let client = EnrichmentClient::new("http://localhost", 50, 0.8);
        assert!(client.try_spend(40));
        assert!(!client.try_spend(20));
    }
}
