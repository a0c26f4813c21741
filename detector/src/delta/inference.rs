//! Swap Inferencer: turns a `TxDeltaRecord` into zero or more `SwapCandidate`s
//! and picks the best one, without decoding any venue's instruction layout.
//!
//! A swap candidate is a wallet whose token delta and SOL/quote-token delta
//! point in opposite directions within the same transaction: tokens out +
//! quote in is a SELL, tokens in + quote out is a BUY. Confidence starts at
//! 1.0 and is penalized for each sign of an unclear or multi-hop route.

use crate::model::{quote_mints, SwapCandidate, SwapSide, TxDeltaRecord, ATA_RENT_LAMPORTS, WSOL_MINT};
use std::collections::HashMap;

/// Known venue program IDs, used only to label the winning candidate - never
/// to decode instruction data.
pub const VENUE_PROGRAMS: &[(&str, &str)] = &[
    ("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P", "pump"),
    ("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA", "pump"),
    ("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4", "jupiter"),
    ("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "raydium"),
    ("CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C", "raydium"),
    ("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK", "raydium"),
    ("routeUGWgWzqBWFcrCfv8tritsqukccJPu3q5GPP3xS", "raydium"),
    ("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc", "orca"),
    ("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo", "meteora"),
];

fn venue_for_programs(programs: &[String]) -> Option<&'static str> {
    for program in programs {
        for (id, venue) in VENUE_PROGRAMS {
            if program == id {
                return Some(venue);
            }
        }
    }
    None
}

pub struct SwapInferencer;

impl SwapInferencer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize WSOL mint to the "SOL" label used for display/venue matching.
    /// Internally we keep the WSOL mint address as the quote mint; this helper
    /// exists purely for callers that want a human label.
    pub fn normalize_wsol_label(mint: &str) -> &str {
        if mint == WSOL_MINT {
            "SOL"
        } else {
            mint
        }
    }

    /// Scan a delta record's per-owner deltas for buy/sell shaped patterns and
    /// return every candidate found, highest confidence first.
    pub fn find_candidates(&self, record: &TxDeltaRecord) -> Vec<SwapCandidate> {
        let quotes = quote_mints();
        let mut by_owner: HashMap<&str, Vec<(&str, i64)>> = HashMap::new();
        for ((owner, mint), delta) in &record.token_deltas {
            by_owner.entry(owner.as_str()).or_default().push((mint.as_str(), *delta));
        }
        // Fold SOL deltas in as WSOL-equivalent legs for owners that also
        // appear as direct account holders (native SOL swap legs).
        for (account, delta) in &record.sol_deltas {
            by_owner.entry(account.as_str()).or_default().push((WSOL_MINT, *delta));
        }

        let mut candidates = Vec::new();
        for (owner, legs) in by_owner {
            if let Some(candidate) = self.check_buy(owner, &legs, &quotes, record) {
                candidates.push(candidate);
            }
            if let Some(candidate) = self.check_sell(owner, &legs, &quotes, record) {
                candidates.push(candidate);
            }
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap()
                .then_with(|| b.quote_amount.cmp(&a.quote_amount))
                .then_with(|| a.user_wallet.cmp(&b.user_wallet))
        });
        candidates
    }

    /// BUY: base token delta positive (received), quote delta negative (paid).
    fn check_buy(
        &self,
        owner: &str,
        legs: &[(&str, i64)],
        quotes: &std::collections::HashSet<&'static str>,
        record: &TxDeltaRecord,
    ) -> Option<SwapCandidate> {
        let quote_spent: Vec<(&str, i64)> =
            legs.iter().filter(|(mint, delta)| *delta < 0 && quotes.contains(mint)).cloned().collect();
        let token_received: Vec<(&str, i64)> =
            legs.iter().filter(|(mint, delta)| *delta > 0 && !quotes.contains(mint)).cloned().collect();
        if quote_spent.is_empty() || token_received.is_empty() {
            return None;
        }
        let quote = *quote_spent.iter().min_by_key(|(_, delta)| *delta)?;
        let base = *token_received.iter().max_by_key(|(_, delta)| *delta)?;

        Some(SwapCandidate {
            user_wallet: owner.to_string(),
            side: SwapSide::Buy,
            base_mint: base.0.to_string(),
            base_amount: base.1 as u64,
            quote_mint: quote.0.to_string(),
            quote_amount: (-quote.1) as u64,
            confidence: self.calculate_confidence(owner, legs, &quote_spent, &token_received, record),
        })
    }

    /// SELL: base token delta negative (sent), quote delta positive (received).
    fn check_sell(
        &self,
        owner: &str,
        legs: &[(&str, i64)],
        quotes: &std::collections::HashSet<&'static str>,
        record: &TxDeltaRecord,
    ) -> Option<SwapCandidate> {
        let token_sold: Vec<(&str, i64)> =
            legs.iter().filter(|(mint, delta)| *delta < 0 && !quotes.contains(mint)).cloned().collect();
        let quote_received: Vec<(&str, i64)> =
            legs.iter().filter(|(mint, delta)| *delta > 0 && quotes.contains(mint)).cloned().collect();
        if token_sold.is_empty() || quote_received.is_empty() {
            return None;
        }
        let base = *token_sold.iter().min_by_key(|(_, delta)| *delta)?;
        let quote = *quote_received.iter().max_by_key(|(_, delta)| *delta)?;

        Some(SwapCandidate {
            user_wallet: owner.to_string(),
            side: SwapSide::Sell,
            base_mint: base.0.to_string(),
            base_amount: (-base.1) as u64,
            quote_mint: quote.0.to_string(),
            quote_amount: quote.1 as u64,
            confidence: self.calculate_confidence(owner, legs, &quote_received, &token_sold, record),
        })
    }

    /// Start at 1.0 and subtract for each sign the transaction's shape doesn't
    /// cleanly look like a single two-leg swap: more than one non-quote delta
    /// moving (multi-hop), no quote delta at all, more than one quote mint
    /// touched, a lamport delta that lands exactly on the ATA rent constant
    /// (rent/swap ambiguity), or more than three total deltas for this owner.
    fn calculate_confidence(
        &self,
        owner: &str,
        legs: &[(&str, i64)],
        quote_legs: &[(&str, i64)],
        non_quote_legs: &[(&str, i64)],
        record: &TxDeltaRecord,
    ) -> f64 {
        let mut confidence = 1.0;

        if non_quote_legs.len() > 1 {
            confidence -= 0.2;
        }

        if quote_legs.is_empty() {
            confidence -= 0.2;
        }

        let distinct_quote_mints = quote_legs.iter().map(|(mint, _)| *mint).collect::<std::collections::HashSet<_>>().len();
        if distinct_quote_mints > 1 {
            confidence -= 0.1;
        }

        if let Some((_, lamport_delta)) = record.sol_deltas.iter().find(|(account, _)| account == owner) {
            if lamport_delta.abs() == ATA_RENT_LAMPORTS {
                confidence -= 0.1;
            }
        }

        let total_token_deltas = legs.iter().filter(|(mint, _)| *mint != WSOL_MINT).count();
        if total_token_deltas > 3 {
            confidence -= 0.1;
        }

        confidence.max(0.0)
    }

    /// Resolve the best candidate in a transaction into a labeled `SwapEvent`-
    /// shaped tuple of (venue, candidate). Returns `None` if no candidate was
    /// found at all.
    pub fn infer_swap<'a>(&self, record: &TxDeltaRecord, candidates: &'a [SwapCandidate]) -> Option<(&'static str, &'a SwapCandidate)> {
        let best = candidates.first()?;
        let venue = venue_for_programs(&record.programs_invoked).unwrap_or("unknown");
        Some((venue, best))
    }
}

impl Default for SwapInferencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(token_deltas: Vec<((String, String), i64)>, programs: Vec<String>) -> TxDeltaRecord {
        TxDeltaRecord {
            signature: "sig".to_string(),
            slot: 1,
            block_time: Some(0),
            fee_payer: "payer".to_string(),
            programs_invoked: programs,
            token_deltas,
            sol_deltas: vec![],
            mints_touched: vec![],
            tx_fee: 5000,
            accounts_created: 0,
        }
    }

    #[test]
    fn detects_a_buy_against_wsol() {
        let record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
            ],
            vec!["JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4".to_string()],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let buy = candidates.iter().find(|c| c.side == SwapSide::Buy).unwrap();
        assert_eq!(buy.base_mint, "MEME");
        assert_eq!(buy.base_amount, 1000);
        assert_eq!(buy.quote_amount, 500);
    }

    #[test]
    fn detects_a_sell_against_wsol() {
        let record = record_with(
            vec![
                (("seller".to_string(), "MEME".to_string()), -1000),
                (("seller".to_string(), WSOL_MINT.to_string()), 480),
            ],
            vec!["6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P".to_string()],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let sell = candidates.iter().find(|c| c.side == SwapSide::Sell).unwrap();
        assert_eq!(sell.base_amount, 1000);
        assert_eq!(sell.quote_amount, 480);
    }

    #[test]
    fn clean_two_leg_swap_keeps_full_confidence() {
        let record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
            ],
            vec!["JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4".to_string()],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        assert_eq!(candidates[0].confidence, 1.0);
    }

    #[test]
    fn multiple_non_quote_deltas_penalize_confidence() {
        let record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), "OTHER".to_string()), 200),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
            ],
            vec![],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let buy = candidates.iter().find(|c| c.side == SwapSide::Buy).unwrap();
        assert!((buy.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn no_quote_delta_present_yields_no_candidate() {
        // A token received with no quote spent/received alongside it isn't a
        // swap at all - the "no quote delta present" confidence penalty only
        // ever matters for a candidate that already cleared this bar.
        let record = record_with(vec![(("buyer".to_string(), "MEME".to_string()), 1000)], vec![]);
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        assert!(candidates.iter().all(|c| c.side != SwapSide::Buy));
    }

    #[test]
    fn multiple_quote_mints_penalize_confidence() {
        use crate::model::USDC_MINT;
        let record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
                (("buyer".to_string(), USDC_MINT.to_string()), -100),
            ],
            vec![],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let buy = candidates.iter().find(|c| c.side == SwapSide::Buy).unwrap();
        assert!((buy.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn lamport_delta_matching_ata_rent_penalizes_confidence() {
        let mut record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
            ],
            vec![],
        );
        record.sol_deltas = vec![("buyer".to_string(), crate::model::ATA_RENT_LAMPORTS)];
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let buy = candidates.iter().find(|c| c.side == SwapSide::Buy).unwrap();
        assert!((buy.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn more_than_three_total_deltas_penalizes_confidence() {
        // Also trips the "multiple non-quote deltas" penalty, since every
        // extra non-quote mint counts toward both conditions.
        let record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
                (("buyer".to_string(), "A".to_string()), 1),
                (("buyer".to_string(), "B".to_string()), 1),
                (("buyer".to_string(), "C".to_string()), 1),
            ],
            vec![],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let buy = candidates.iter().find(|c| c.side == SwapSide::Buy).unwrap();
        assert!((buy.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn ties_break_on_quote_magnitude_then_wallet_id() {
        let record = record_with(
            vec![
                (("bbbbb".to_string(), "MEME".to_string()), 1000),
                (("bbbbb".to_string(), WSOL_MINT.to_string()), -500),
                (("aaaaa".to_string(), "MEME".to_string()), 1000),
                (("aaaaa".to_string(), WSOL_MINT.to_string()), -500),
                (("ccccc".to_string(), "MEME".to_string()), 1000),
                (("ccccc".to_string(), WSOL_MINT.to_string()), -700),
            ],
            vec![],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let top_buy = candidates.iter().find(|c| c.side == SwapSide::Buy).unwrap();
        // "ccccc" has the largest quote magnitude (700 > 500), so it wins
        // even though "aaaaa" would sort first lexicographically.
        assert_eq!(top_buy.user_wallet, "ccccc");
    }

    #[test]
    fn infer_swap_picks_highest_confidence_candidate() {
        let record = record_with(
            vec![
                (("buyer".to_string(), "MEME".to_string()), 1000),
                (("buyer".to_string(), WSOL_MINT.to_string()), -500),
            ],
            vec!["JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4".to_string()],
        );
        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let (venue, best) = inferencer.infer_swap(&record, &candidates).unwrap();
        assert_eq!(venue, "jupiter");
        assert_eq!(best.side, SwapSide::Buy);
    }

    #[test]
    fn no_candidates_when_nothing_moves() {
        let record = record_with(vec![], vec![]);
        let inferencer = SwapInferencer::new();
        assert!(inferencer.find_candidates(&record).is_empty());
    }
}
