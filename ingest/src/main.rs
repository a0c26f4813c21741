//! Ingest binary: subscription adapter + Ingest Writer.
//!
//! Connects to the chain-gateway stream, decodes each transaction update
//! structurally, and appends it to the durable stream (`stream:tx`) for the
//! detector's consumer pool to pick up. Out of scope here (§1): anything
//! past the Ingest Writer boundary — delta extraction, inference, counters,
//! triggers all live in `detector`.

use anyhow::{Context, Result};
use detector::stream::backend::RedisStreamBackend;
use detector::subscription::SubscriptionAdapter;
use ingest::checkpoint::Checkpoint;
use ingest::config::Config;
use ingest::grpc::decode::YellowstoneSubscriptionAdapter;
use ingest::writer::IngestWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CHECKPOINT_PATH: &str = "./data/ingest_checkpoint.json";
const CHECKPOINT_SLOT_INTERVAL: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let config = Config::load_or_default().context("failed to load ingest configuration")?;
    init_tracing(&config.monitoring.log_level, config.monitoring.json_logs);

    info!(
        programs = config.programs.account_include.len(),
        endpoint = %config.grpc.endpoint,
        "starting ingest"
    );

    let stream_backend = Arc::new(
        RedisStreamBackend::connect(
            &config.stream.redis_url,
            &config.stream.stream_key,
            &config.stream.consumer_group,
            config.stream.maxlen_approx,
        )
        .await
        .context("failed to connect to durable stream")?,
    );
    let writer = IngestWriter::new(stream_backend);

    let mut adapter = YellowstoneSubscriptionAdapter::new(&config.grpc, config.programs.account_include.clone());

    let mut checkpoint = Checkpoint::load(CHECKPOINT_PATH)?.unwrap_or_else(|| Checkpoint::new(0));
    let mut last_checkpointed_slot = checkpoint.last_processed_slot;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_signal.cancel();
        }
    });

    let mut accepted: u64 = 0;
    let mut rejected: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let update = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = adapter.next_update() => result,
        };

        match update {
            Ok(Some(update)) => {
                let slot = update.slot;
                match writer.push(&update).await {
                    Ok(_) => accepted += 1,
                    Err(e) => {
                        rejected += 1;
                        warn!(error = %e, signature = %update.signature, "failed to append update to durable stream");
                    }
                }

                if slot >= last_checkpointed_slot + CHECKPOINT_SLOT_INTERVAL {
                    checkpoint.update(slot);
                    if let Err(e) = checkpoint.save(CHECKPOINT_PATH) {
                        warn!(error = %e, "failed to persist checkpoint");
                    } else {
                        last_checkpointed_slot = slot;
                    }
                }
            }
            Ok(None) => continue,
            Err(e) => {
                rejected += 1;
                warn!(error = %e, "subscription adapter returned an error for this update");
            }
        }

        if (accepted + rejected) % 10_000 == 0 && accepted + rejected > 0 {
            info!(accepted, rejected, pushed = writer.pushed_count(), failed = writer.failed_count(), "ingest progress");
        }
    }

    info!(accepted, rejected, "ingest shutting down, flushing checkpoint");
    checkpoint.update(last_checkpointed_slot);
    let _ = checkpoint.save(CHECKPOINT_PATH);
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
