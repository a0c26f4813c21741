//! Cabal detector service entrypoint.
//!
//! Wires the durable-stream consumer pool to delta extraction, swap
//! inference, rolling counters, trigger evaluation, wallet clustering and
//! scoring, and alert dispatch, then runs until signaled to shut down.

mod pipeline;

use anyhow::{Context, Result};
use detector::alerts::channels::bot_api::BotApiChannel;
use detector::alerts::channels::webhook::WebhookChannel;
use detector::alerts::AlertDispatcher;
use detector::backpressure::BackpressureController;
use detector::config::Config;
use detector::counters::{CounterStore, RedisCounterBackend};
use detector::enrichment::EnrichmentClient;
use detector::state::{BackfillQueue, StateManager};
use detector::storage::{DeltaLog, ProfileStore, TouchLog};
use detector::stream::{ConsumerPool, RedisStreamBackend};
use detector::triggers::TriggerEvaluator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_TRIGGERS_PATH: &str = "triggers.yaml";
/// Re-delivery window: a signature seen twice within this TTL is a
/// duplicate, not a new transaction.
const DEDUP_TTL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    detector::metrics::init_metrics();

    log::info!("starting cabal detector");

    let redis_client = redis::Client::open(config.redis.url.as_str()).context("invalid REDIS_URL")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to redis")?;

    let stream_backend = Arc::new(
        RedisStreamBackend::connect(
            &config.redis.url,
            &config.redis.stream_key,
            &config.redis.consumer_group,
            config.redis.stream_maxlen_approx,
        )
        .await
        .context("failed to open durable stream")?,
    );

    let profile_store = Arc::new(
        ProfileStore::connect(
            &config.postgres.host,
            config.postgres.port,
            &config.postgres.user,
            &config.postgres.password,
            &config.postgres.dbname,
        )
        .context("failed to open profile store")?,
    );
    profile_store.migrate().await.context("failed to run profile store migrations")?;

    let dedup_backend = Arc::new(detector::stream::RedisDedupBackend::new(redis_conn.clone()));
    let dedup = Arc::new(detector::stream::DedupFilter::new(dedup_backend, DEDUP_TTL_SECS, 100_000));

    let counter_backend = Arc::new(RedisCounterBackend::new(
        redis_conn.clone(),
        config.counters.wallet_first_seen_ttl_secs,
    ));
    let counter_store = Arc::new(CounterStore::new(
        counter_backend,
        config.counters.short_window_secs,
        config.counters.short_bucket_secs,
        config.counters.long_window_secs,
        config.counters.long_bucket_secs,
        config.counters.stats_cache_ttl_ms,
    ));

    let delta_log = Arc::new(
        DeltaLog::open(
            config.logs.delta_log_dir.clone(),
            config.logs.delta_log_rotation_secs,
            config.logs.delta_log_retention_minutes,
        )
        .await
        .context("failed to open delta log")?,
    );
    let touch_log = Arc::new(
        TouchLog::open(config.logs.touch_log_dir.clone(), config.logs.touch_log_rotation_secs, config.logs.touch_log_flush_bytes)
            .await
            .context("failed to open touch log")?,
    );

    let state_manager = Arc::new(StateManager::new(
        redis_conn.clone(),
        profile_store.clone(),
        config.state.hot_ttl_secs,
        config.state.warm_to_hot_mcap_floor_usd,
    ));
    let backfill_queue = Arc::new(BackfillQueue::new());

    let triggers_yaml = std::fs::read_to_string(DEFAULT_TRIGGERS_PATH)
        .with_context(|| format!("failed to read trigger rules from {}", DEFAULT_TRIGGERS_PATH))?;
    let trigger_evaluator = Arc::new(TriggerEvaluator::from_yaml(&triggers_yaml).context("invalid trigger rules")?);

    let backpressure = Arc::new(BackpressureController::new(
        config.backpressure.degraded_lag_secs,
        config.backpressure.critical_lag_secs,
        config.backpressure.degraded_stream_len,
        config.backpressure.critical_stream_len,
    ));

    let enrichment = Arc::new(EnrichmentClient::new(
        config.enrichment.rpc_url.clone(),
        config.enrichment.daily_credit_budget,
        config.enrichment.degraded_budget_fraction,
    ));

    let mut dispatcher = AlertDispatcher::new();
    if let Some(url) = &config.alerts.webhook_url {
        dispatcher.add_channel(Box::new(WebhookChannel::new(url.clone())), config.alerts.per_minute_rate_limit);
    }
    if !config.alerts.bot_api_token.is_empty() {
        dispatcher.add_channel(
            Box::new(BotApiChannel::new(config.alerts.bot_api_token.clone(), config.alerts.bot_api_chat_id.clone())),
            config.alerts.per_minute_rate_limit,
        );
    }
    let dispatcher = Arc::new(dispatcher);

    let processor = Arc::new(pipeline::PipelineProcessor::new(
        dedup,
        counter_store,
        delta_log.clone(),
        touch_log,
        state_manager.clone(),
        backfill_queue.clone(),
        trigger_evaluator,
        backpressure.clone(),
        enrichment.clone(),
        dispatcher,
        profile_store.clone(),
        config.counters.short_window_secs,
        config.counters.long_window_secs,
    ));

    let consumer_pool = Arc::new(ConsumerPool::new(
        stream_backend.clone(),
        processor.clone(),
        config.consumer.pool_size,
        config.consumer.batch_size,
        config.consumer.block_ms,
        config.consumer.claim_idle_ms,
    ));

    let cancel = CancellationToken::new();
    let mut handles = consumer_pool.spawn(cancel.clone());

    handles.push(tokio::spawn(pipeline::run_backfill_worker(
        backfill_queue,
        delta_log,
        processor.counter_store.clone(),
        state_manager.clone(),
        profile_store,
        cancel.clone(),
    )));

    handles.push(tokio::spawn(pipeline::run_maintenance_worker(
        processor.clone(),
        state_manager,
        stream_backend.clone(),
        backpressure.clone(),
        config.state.hot_refresh_interval_secs,
        config.consumer.maintenance_interval_secs,
        cancel.clone(),
    )));

    handles.push(tokio::spawn(run_metrics_server(config.network.metrics_port, cancel.clone())));

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining in-flight work");
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    log::info!("cabal detector stopped");
    Ok(())
}

async fn run_metrics_server(port: u16, cancel: CancellationToken) {
    tokio::select! {
        result = detector::metrics::start_metrics_server(port) => {
            if let Err(e) = result {
                log::error!("metrics server exited: {}", e);
            }
        }
        _ = cancel.cancelled() => {
            log::info!("metrics server shutting down");
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
