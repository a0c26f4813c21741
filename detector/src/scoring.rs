//! Coordination scorer: a weighted composite of five independently-scored
//! components, each mapped through piecewise thresholds into a 0.0-1.0
//! sub-score before being combined. Confidence is tracked separately from
//! the score itself - a HIGH coordination score built on five buyers is
//! less trustworthy than the same score built on fifty.

use std::collections::HashMap;

pub const WEIGHT_CONCENTRATION: f64 = 0.25;
pub const WEIGHT_CLUSTER: f64 = 0.30;
pub const WEIGHT_TIMING: f64 = 0.15;
pub const WEIGHT_NEW_WALLET: f64 = 0.15;
pub const WEIGHT_RATIO: f64 = 0.15;

#[derive(Debug, Clone, Default)]
pub struct ScoreInput {
    pub top_3_buyers_volume_share: f64,
    pub large_cluster_wallet_count: usize,
    pub total_wallet_count: usize,
    pub buy_count: u64,
    pub unique_buyers: u64,
    pub new_wallet_pct: f64,
    pub buy_sell_ratio: f64,
    pub top_buyer_volumes: Vec<f64>,
    pub total_volume_sol: f64,
}

#[derive(Debug, Clone)]
pub struct ScoreComponents {
    pub concentration: f64,
    pub cluster: f64,
    pub timing: f64,
    pub new_wallet: f64,
    pub ratio: f64,
    pub composite: f64,
    pub confidence: f64,
}

pub struct CoordinationScorer;

impl CoordinationScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, input: &ScoreInput) -> ScoreComponents {
        let concentration = Self::score_concentration(input.top_3_buyers_volume_share);
        let cluster = Self::score_cluster(input.large_cluster_wallet_count, input.total_wallet_count);
        let timing = Self::score_timing(input.buy_count, input.unique_buyers);
        let new_wallet = Self::score_new_wallet(input.new_wallet_pct);
        let ratio = Self::score_ratio(input.buy_sell_ratio);

        let composite = concentration * WEIGHT_CONCENTRATION
            + cluster * WEIGHT_CLUSTER
            + timing * WEIGHT_TIMING
            + new_wallet * WEIGHT_NEW_WALLET
            + ratio * WEIGHT_RATIO;

        let confidence = Self::calculate_confidence(input);

        ScoreComponents { concentration, cluster, timing, new_wallet, ratio, composite, confidence }
    }

    fn score_concentration(top_3_share: f64) -> f64 {
        if top_3_share >= 0.8 {
            1.0
        } else if top_3_share >= 0.6 {
            0.8
        } else if top_3_share >= 0.4 {
            0.5
        } else if top_3_share >= 0.2 {
            0.2
        } else {
            0.0
        }
    }

    fn score_cluster(large_cluster_wallets: usize, total_wallets: usize) -> f64 {
        if total_wallets == 0 {
            return 0.0;
        }
        let cluster_pct = large_cluster_wallets as f64 / total_wallets as f64;
        if cluster_pct >= 0.5 {
            (cluster_pct + 0.2).min(1.0)
        } else if cluster_pct >= 0.2 {
            cluster_pct + 0.1
        } else {
            0.0
        }
    }

    fn score_timing(buy_count: u64, unique_buyers: u64) -> f64 {
        if unique_buyers == 0 {
            return 0.0;
        }
        let buys_per_buyer = buy_count as f64 / unique_buyers as f64;
        if buys_per_buyer >= 10.0 {
            1.0
        } else if buys_per_buyer >= 5.0 {
            0.7
        } else if buys_per_buyer >= 3.0 {
            0.4
        } else if buys_per_buyer >= 2.0 {
            0.2
        } else {
            0.0
        }
    }

    fn score_new_wallet(new_wallet_pct: f64) -> f64 {
        if new_wallet_pct >= 0.7 {
            1.0
        } else if new_wallet_pct >= 0.5 {
            0.7
        } else if new_wallet_pct >= 0.3 {
            0.4
        } else {
            0.0
        }
    }

    fn score_ratio(buy_sell_ratio: f64) -> f64 {
        if buy_sell_ratio.is_infinite() || buy_sell_ratio >= 20.0 {
            1.0
        } else if buy_sell_ratio >= 10.0 {
            0.8
        } else if buy_sell_ratio >= 5.0 {
            0.5
        } else if buy_sell_ratio >= 3.0 {
            0.3
        } else {
            0.0
        }
    }

    /// Start at 1.0 and dock points for thin evidence - low sample counts
    /// make any component score less trustworthy regardless of its value.
    fn calculate_confidence(input: &ScoreInput) -> f64 {
        let mut confidence = 1.0;

        if input.buy_count < 5 {
            confidence -= 0.3;
        } else if input.buy_count < 10 {
            confidence -= 0.2;
        } else if input.buy_count < 20 {
            confidence -= 0.1;
        }

        if input.top_buyer_volumes.len() < 3 {
            confidence -= 0.2;
        } else if input.top_buyer_volumes.len() < 5 {
            confidence -= 0.1;
        }

        if input.total_volume_sol < 1.0 {
            confidence -= 0.2;
        } else if input.total_volume_sol < 5.0 {
            confidence -= 0.1;
        }

        confidence.max(0.1)
    }

    pub fn get_risk_level(composite_score: f64) -> &'static str {
        if composite_score >= 0.7 {
            "HIGH"
        } else if composite_score >= 0.4 {
            "MEDIUM"
        } else if composite_score >= 0.2 {
            "LOW"
        } else {
            "MINIMAL"
        }
    }

    pub fn format_score_summary(mint: &str, components: &ScoreComponents) -> String {
        format!(
            "{}: score={:.2} ({}) confidence={:.2} [concentration={:.2} cluster={:.2} timing={:.2} new_wallet={:.2} ratio={:.2}]",
            mint,
            components.composite,
            Self::get_risk_level(components.composite),
            components.confidence,
            components.concentration,
            components.cluster,
            components.timing,
            components.new_wallet,
            components.ratio,
        )
    }
}

impl Default for CoordinationScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for building a `ScoreInput` from raw wallet volume data, used by
/// the detection-evaluation worker once a mint's trigger fires.
pub fn top_3_share(volumes: &HashMap<String, f64>) -> f64 {
    let mut sorted: Vec<f64> = volumes.values().copied().collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let top3: f64 = sorted.iter().take(3).sum();
    let total: f64 = sorted.iter().sum();
    if total > 0.0 {
        top3 / total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total = WEIGHT_CONCENTRATION + WEIGHT_CLUSTER + WEIGHT_TIMING + WEIGHT_NEW_WALLET + WEIGHT_RATIO;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn high_concentration_high_cluster_scores_high_risk() {
        let scorer = CoordinationScorer::new();
        let input = ScoreInput {
            top_3_buyers_volume_share: 0.9,
            large_cluster_wallet_count: 8,
            total_wallet_count: 10,
            buy_count: 50,
            unique_buyers: 10,
            new_wallet_pct: 0.8,
            buy_sell_ratio: 25.0,
            top_buyer_volumes: vec![10.0, 8.0, 5.0, 2.0, 1.0],
            total_volume_sol: 30.0,
        };
        let components = scorer.score(&input);
        assert_eq!(CoordinationScorer::get_risk_level(components.composite), "HIGH");
        assert!(components.confidence > 0.9);
    }

    #[test]
    fn thin_sample_size_caps_confidence_even_with_high_score() {
        let scorer = CoordinationScorer::new();
        let input = ScoreInput {
            top_3_buyers_volume_share: 0.9,
            large_cluster_wallet_count: 3,
            total_wallet_count: 3,
            buy_count: 3,
            unique_buyers: 3,
            new_wallet_pct: 1.0,
            buy_sell_ratio: f64::INFINITY,
            top_buyer_volumes: vec![1.0],
            total_volume_sol: 0.5,
        };
        let components = scorer.score(&input);
        assert!(components.confidence <= 0.4);
    }

    #[test]
    fn zero_wallets_scores_zero_cluster_component() {
        assert_eq!(CoordinationScorer::score_cluster(0, 0), 0.0);
    }

    #[test]
    fn top_3_share_helper_matches_manual_calculation() {
        let mut volumes = HashMap::new();
        volumes.insert("a".to_string(), 6.0);
        volumes.insert("b".to_string(), 3.0);
        volumes.insert("c".to_string(), 1.0);
        assert!((top_3_share(&volumes) - 1.0).abs() < 1e-9);
    }
}
