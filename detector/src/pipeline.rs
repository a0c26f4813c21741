//! Per-message processing pipeline and the two long-running background
//! workers (backfill, maintenance) that ride alongside the consumer pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use detector::alerts::AlertDispatcher;
use detector::backpressure::BackpressureController;
use detector::cluster::WalletClusterer;
use detector::counters::{CounterStore, SwapRecord};
use detector::delta::{DeltaBuilder, SwapInferencer};
use detector::enrichment::EnrichmentClient;
use detector::model::{
    Alert, DegradationMode, MintTouchEvent, SwapEvent, SwapSide, TokenTier, TransactionUpdate, USDC_MINT, USDT_MINT,
    WSOL_MINT,
};
use detector::scoring::{CoordinationScorer, ScoreInput};
use detector::state::{BackfillQueue, StateManager};
use detector::storage::{DeltaLog, ProfileStore, TouchLog};
use detector::stream::{DedupFilter, MessageProcessor, StreamBackend, StreamMessage};
use detector::triggers::TriggerEvaluator;
use detector::wire;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Minimum inference confidence to treat a candidate as a real swap rather
/// than discard it as too ambiguous to count.
const MIN_SWAP_CONFIDENCE: f64 = 0.3;
/// A wallet whose cluster has at least this many members counts toward
/// "coordinated" in the scorer's cluster-concentration component.
const MIN_CLUSTER_SIZE: usize = 3;
/// How many top buyers by volume feed the clustering/scoring pass.
const TOP_BUYER_SAMPLE: usize = 50;

pub struct PipelineProcessor {
    pub dedup: Arc<DedupFilter>,
    pub counter_store: Arc<CounterStore>,
    pub delta_log: Arc<DeltaLog>,
    pub touch_log: Arc<TouchLog>,
    pub state_manager: Arc<StateManager>,
    pub backfill_queue: Arc<BackfillQueue>,
    pub trigger_evaluator: Arc<TriggerEvaluator>,
    pub backpressure: Arc<BackpressureController>,
    pub enrichment: Arc<EnrichmentClient>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub profile_store: Arc<ProfileStore>,
    short_window_secs: u64,
    long_window_secs: u64,
    clusterer: Mutex<WalletClusterer>,
    last_block_time: AtomicI64,
}

impl PipelineProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dedup: Arc<DedupFilter>,
        counter_store: Arc<CounterStore>,
        delta_log: Arc<DeltaLog>,
        touch_log: Arc<TouchLog>,
        state_manager: Arc<StateManager>,
        backfill_queue: Arc<BackfillQueue>,
        trigger_evaluator: Arc<TriggerEvaluator>,
        backpressure: Arc<BackpressureController>,
        enrichment: Arc<EnrichmentClient>,
        dispatcher: Arc<AlertDispatcher>,
        profile_store: Arc<ProfileStore>,
        short_window_secs: u64,
        long_window_secs: u64,
    ) -> Self {
        Self {
            dedup,
            counter_store,
            delta_log,
            touch_log,
            state_manager,
            backfill_queue,
            trigger_evaluator,
            backpressure,
            enrichment,
            dispatcher,
            profile_store,
            short_window_secs,
            long_window_secs,
            clusterer: Mutex::new(WalletClusterer::new()),
            last_block_time: AtomicI64::new(0),
        }
    }

    pub fn last_processed_lag_secs(&self) -> f64 {
        let last = self.last_block_time.load(Ordering::Relaxed);
        if last == 0 {
            return 0.0;
        }
        (Utc::now().timestamp() - last).max(0) as f64
    }

    async fn handle(&self, update: &TransactionUpdate) -> Result<()> {
        if self.dedup.is_duplicate(&update.signature).await.context("dedup check failed")? {
            detector::metrics::metrics().entries_duplicate.inc();
            return Ok(());
        }

        let now = update.block_time.unwrap_or_else(|| Utc::now().timestamp());
        self.last_block_time.store(now, Ordering::Relaxed);

        let builder = DeltaBuilder::new();
        let record = builder.build_deltas(update);

        self.touch_log
            .append(&MintTouchEvent {
                signature: record.signature.clone(),
                slot: record.slot,
                block_time: record.block_time,
                fee_payer: record.fee_payer.clone(),
                mints_touched: record.mints_touched.clone(),
                programs_invoked: record.programs_invoked.clone(),
                compute_units: None,
            })
            .await
            .context("touch log append failed")?;

        // The delta log backs HOT-promotion backfill and is cheap to write;
        // unlike SwapEvent persistence it is never gated by backpressure
        // mode, so a degraded pipeline still has history to replay once a
        // mint clears its trigger.
        self.delta_log.append(&record).await.context("delta log append failed")?;

        if !self.backpressure.should_parse_full() {
            detector::metrics::metrics().entries_accepted.inc();
            return Ok(());
        }

        let inferencer = SwapInferencer::new();
        let candidates = inferencer.find_candidates(&record);
        let Some((venue, candidate)) = inferencer.infer_swap(&record, &candidates) else {
            detector::metrics::metrics().entries_accepted.inc();
            return Ok(());
        };

        if candidate.confidence < MIN_SWAP_CONFIDENCE {
            detector::metrics::metrics().swaps_below_confidence.inc();
            return Ok(());
        }
        detector::metrics::metrics().swaps_inferred.inc();

        for mint in &record.mints_touched {
            if mint == &candidate.base_mint {
                self.process_swap_for_mint(mint, venue, candidate, &record, now).await?;
            }
        }

        detector::metrics::metrics().entries_accepted.inc();
        Ok(())
    }

    async fn process_swap_for_mint(
        &self,
        mint: &str,
        venue: &str,
        candidate: &detector::model::SwapCandidate,
        record: &detector::model::TxDeltaRecord,
        now: i64,
    ) -> Result<()> {
        let volume_sol = quote_to_sol(&candidate.quote_mint, candidate.quote_amount);

        let is_new_wallet = self
            .counter_store
            .get_wallet_first_seen(&candidate.user_wallet)
            .await
            .context("wallet first-seen lookup failed")?
            .is_none();

        self.counter_store
            .record_swap(
                SwapRecord { mint, side: candidate.side, user_wallet: &candidate.user_wallet, volume_sol },
                now,
            )
            .await
            .context("counter store record_swap failed")?;

        {
            let mut clusterer = self.clusterer.lock().unwrap();
            clusterer.add_wallet(&candidate.user_wallet);
        }

        if is_new_wallet && candidate.side == SwapSide::Buy && self.backpressure.should_enrich() {
            if let Ok(Some(parent)) = self.enrichment.get_funding_parent(&candidate.user_wallet).await {
                let mut clusterer = self.clusterer.lock().unwrap();
                clusterer.link_funding(&parent, &candidate.user_wallet);
            }
        }

        let tier = self.state_manager.get_state(mint).await.context("state lookup failed")?;
        if tier == TokenTier::Cold {
            self.state_manager.transition_to_warm(mint, now).await.context("transition to warm failed")?;
            detector::metrics::metrics().mints_promoted_warm.inc();
        }

        // Individual swaps are only persisted once a mint is at least WARM
        // (tier is WARM-or-better at this point, whether it started that way
        // or was just promoted above), and only when the backpressure gate
        // allows it.
        if self.backpressure.should_store_swap_event() {
            let event = SwapEvent {
                signature: record.signature.clone(),
                slot: record.slot,
                block_time: record.block_time,
                venue: venue.to_string(),
                user_wallet: candidate.user_wallet.clone(),
                side: candidate.side,
                base_mint: candidate.base_mint.clone(),
                base_amount: candidate.base_amount,
                quote_mint: candidate.quote_mint.clone(),
                quote_amount: candidate.quote_amount,
                confidence: candidate.confidence,
                route_depth: 1,
            };
            if let Err(e) = self.profile_store.insert_swap_event(&event, mint, now).await {
                log::warn!("swap event persistence failed for {} {}: {}", mint, record.signature, e);
            }
        }

        let stats_5m = self.counter_store.get_stats(mint, self.short_window_secs, now).await.context("5m stats failed")?;
        let stats_1h = self.counter_store.get_stats(mint, self.long_window_secs, now).await.context("1h stats failed")?;

        let fields_5m = stats_5m.to_field_map("_5m");
        let fields_1h = stats_1h.to_field_map("_1h");

        let Some((trigger_name, reason)) = self.trigger_evaluator.evaluate(&fields_5m, &fields_1h) else {
            return Ok(());
        };

        let top_buyers = self
            .counter_store
            .top_buyers_by_volume(mint, TOP_BUYER_SAMPLE)
            .await
            .context("top buyers lookup failed")?;

        let (large_cluster_wallet_count, total_wallet_count) = {
            let mut clusterer = self.clusterer.lock().unwrap();
            let mut in_large_cluster = 0usize;
            for (wallet, _) in &top_buyers {
                if clusterer.get_cluster(wallet).len() >= MIN_CLUSTER_SIZE {
                    in_large_cluster += 1;
                }
            }
            (in_large_cluster, top_buyers.len())
        };

        let top_buyer_volumes: Vec<f64> = top_buyers.iter().map(|(_, v)| *v).collect();
        let total_volume_sol = stats_5m.buy_volume_sol + stats_5m.sell_volume_sol;

        let score_input = ScoreInput {
            top_3_buyers_volume_share: stats_5m.top_3_buyers_volume_share,
            large_cluster_wallet_count,
            total_wallet_count: total_wallet_count.max(1),
            buy_count: stats_5m.buy_count,
            unique_buyers: stats_5m.unique_buyers,
            new_wallet_pct: stats_5m.new_wallet_pct,
            buy_sell_ratio: stats_5m.buy_sell_ratio,
            top_buyer_volumes,
            total_volume_sol,
        };

        let scorer = CoordinationScorer::new();
        let components = scorer.score(&score_input);
        let risk_level = CoordinationScorer::get_risk_level(components.composite);

        // Prefer the last cached market cap over leaving the floor check
        // unenforced; a fresh on-chain read would win if one were available
        // here, but no live price feed is wired into this pipeline stage.
        let cached_mcap = self
            .profile_store
            .get_token_profile(mint)
            .await
            .ok()
            .flatten()
            .and_then(|p| p.market_cap_usd);

        let promoted = self
            .state_manager
            .transition_to_hot(mint, now, &reason, cached_mcap, &self.backfill_queue)
            .await
            .context("transition to hot failed")?;
        if promoted {
            detector::metrics::metrics().mints_promoted_hot.inc();
        }

        {
            let mut clusterer = self.clusterer.lock().unwrap();
            for large_cluster in clusterer.get_large_clusters(MIN_CLUSTER_SIZE) {
                for pair in large_cluster.windows(2) {
                    let _ = self.profile_store.record_cluster_edge(&pair[0], &pair[1], mint).await;
                }
            }
        }

        // Only the COLD/WARM -> HOT transition produces an alert; a
        // re-trigger of an already-HOT mint just refreshed its TTL above and
        // must not emit a second alert for the same promotion.
        if !promoted {
            return Ok(());
        }

        let top_3_buyers: Vec<(String, f64)> = top_buyers.iter().take(3).cloned().collect();
        let cluster_summary = {
            let mut clusterer = self.clusterer.lock().unwrap();
            clusterer.generate_summary(mint, 3)
        };

        let summary = CoordinationScorer::format_score_summary(mint, &components);
        let mut alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            mint: mint.to_string(),
            trigger_reason: format!("{} ({}): {}", trigger_name, venue, reason),
            coordination_score: components.composite,
            confidence: components.confidence,
            risk_level: risk_level.to_string(),
            summary,
            top_buyers: top_3_buyers,
            cluster_summary,
            market_cap_usd: cached_mcap,
            enrichment_degraded: self.enrichment.budget_state() != detector::enrichment::BudgetState::Normal,
            created_at: now,
            delivery: std::collections::HashMap::new(),
        };
        detector::metrics::metrics().alerts_created.inc();
        alert.delivery = self.dispatcher.dispatch(&alert).await;

        if let Err(e) = self.profile_store.insert_alert(&alert).await {
            log::warn!("alert persistence failed for {}: {}", mint, e);
        }

        Ok(())
    }
}

fn quote_to_sol(quote_mint: &str, raw_amount: u64) -> f64 {
    let decimals = if quote_mint == WSOL_MINT {
        9
    } else if quote_mint == USDC_MINT || quote_mint == USDT_MINT {
        6
    } else {
        9
    };
    raw_amount as f64 / 10f64.powi(decimals)
}

#[async_trait]
impl MessageProcessor for PipelineProcessor {
    async fn process(&self, message: &StreamMessage) -> Result<()> {
        let update: TransactionUpdate = wire::decode_record(&message.payload).context("failed to decode transaction update")?;
        self.handle(&update).await
    }
}

/// Drains mints promoted to HOT for the first time and replays their recent
/// Delta Log history into the counter store, so a token that just crossed
/// the trigger threshold doesn't show an artificially empty 1h window.
pub async fn run_backfill_worker(
    queue: Arc<BackfillQueue>,
    delta_log: Arc<DeltaLog>,
    counter_store: Arc<CounterStore>,
    _state_manager: Arc<StateManager>,
    _profile_store: Arc<ProfileStore>,
    cancel: CancellationToken,
) {
    let inferencer = SwapInferencer::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("backfill worker shutting down");
                return;
            }
            mint = queue.dequeue() => {
                let Some(mint) = mint else { continue };
                let since = Utc::now().timestamp() - 3600;
                match delta_log.read_for_mint(&mint, since).await {
                    Ok(records) => {
                        let mut replayed = 0usize;
                        for record in &records {
                            let candidates = inferencer.find_candidates(record);
                            let Some((_venue, candidate)) = inferencer.infer_swap(record, &candidates) else { continue };
                            if candidate.confidence < MIN_SWAP_CONFIDENCE || &candidate.base_mint != &mint {
                                continue;
                            }
                            let volume_sol = quote_to_sol(&candidate.quote_mint, candidate.quote_amount);
                            let at = record.block_time;
                            if let Err(e) = counter_store
                                .record_swap(
                                    SwapRecord { mint: &mint, side: candidate.side, user_wallet: &candidate.user_wallet, volume_sol },
                                    at,
                                )
                                .await
                            {
                                log::warn!("backfill replay failed for {} at {}: {}", mint, record.signature, e);
                                continue;
                            }
                            replayed += 1;
                        }
                        log::info!(
                            "backfilled {} of {} historical delta records for newly-hot mint {}",
                            replayed,
                            records.len(),
                            mint
                        );
                    }
                    Err(e) => {
                        log::warn!("backfill read failed for {}: {}", mint, e);
                    }
                }
            }
        }
    }
}

/// Periodic maintenance: refresh the HOT token TTL set, and sample consumer
/// lag + stream length into the backpressure controller and the metrics
/// gauges the `/health` endpoint reports.
pub async fn run_maintenance_worker(
    processor: Arc<PipelineProcessor>,
    state_manager: Arc<StateManager>,
    stream_backend: Arc<dyn StreamBackend>,
    backpressure: Arc<BackpressureController>,
    hot_refresh_interval_secs: u64,
    maintenance_interval_secs: u64,
    cancel: CancellationToken,
) {
    let mut ticks: u64 = 0;
    let interval = maintenance_interval_secs.max(1);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("maintenance worker shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {
                ticks += interval;

                let stream_len = stream_backend.len().await.unwrap_or(0);
                detector::metrics::metrics().stream_backlog.set(stream_len as i64);

                let lag_secs = processor.last_processed_lag_secs();
                let mode = backpressure.update(lag_secs, stream_len);
                detector::metrics::set_mode(mode);
                if mode != DegradationMode::Normal {
                    log::warn!("backpressure mode: {:?}, stream_len={}", mode, stream_len);
                }

                if ticks >= hot_refresh_interval_secs {
                    ticks = 0;
                    if let Err(e) = state_manager.refresh_hot_tokens().await {
                        log::warn!("hot token refresh failed: {}", e);
                    }
                }
            }
        }
    }
}
