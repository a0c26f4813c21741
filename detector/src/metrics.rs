//! Prometheus metrics + health surface.
//!
//! Exposes the operator-visible health surface from spec §7: degradation
//! mode, lag, backlog, accepted/rejected/duplicate entry counts, per-channel
//! alert retry/error counts, and enrichment credit usage. Grounded on the
//! teacher's `execution/src/metrics.rs` (global `once_cell::Lazy` registry +
//! `axum` `/metrics` + `/health` routes), generalized from trading-decision
//! counters to detection-pipeline counters.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use once_cell::sync::Lazy;
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

static METRICS: Lazy<Arc<DetectorMetrics>> = Lazy::new(|| Arc::new(DetectorMetrics::new()));
static MODE: AtomicU8 = AtomicU8::new(0);

pub struct DetectorMetrics {
    registry: Registry,

    pub entries_accepted: IntCounter,
    pub entries_rejected: IntCounter,
    pub entries_duplicate: IntCounter,
    pub entries_parse_failed: IntCounter,

    pub swaps_inferred: IntCounter,
    pub swaps_below_confidence: IntCounter,

    pub mints_promoted_warm: IntCounter,
    pub mints_promoted_hot: IntCounter,
    pub mints_demoted_cold: IntCounter,
    pub alerts_created: IntCounter,

    pub consumer_lag_seconds: Gauge,
    pub stream_backlog: IntGauge,

    pub alert_channel_sent: IntCounterVec,
    pub alert_channel_retries: IntCounterVec,
    pub alert_channel_errors: IntCounterVec,

    pub enrichment_credits_spent_today: IntGauge,
    pub enrichment_degraded: IntGauge,
}

impl DetectorMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        macro_rules! counter {
            ($name:expr, $help:expr) => {{
                let c = IntCounter::with_opts(Opts::new($name, $help)).unwrap();
                registry.register(Box::new(c.clone())).unwrap();
                c
            }};
        }

        let entries_accepted = counter!("detector_entries_accepted_total", "Stream entries accepted for processing");
        let entries_rejected = counter!("detector_entries_rejected_total", "Stream entries rejected (malformed)");
        let entries_duplicate = counter!("detector_entries_duplicate_total", "Stream entries skipped as duplicates");
        let entries_parse_failed = counter!("detector_entries_parse_failed_total", "Entries that failed delta extraction");

        let swaps_inferred = counter!("detector_swaps_inferred_total", "Swaps inferred with confidence >= threshold");
        let swaps_below_confidence = counter!("detector_swaps_below_confidence_total", "Candidate swaps dropped for low confidence");

        let mints_promoted_warm = counter!("detector_mints_promoted_warm_total", "COLD -> WARM promotions");
        let mints_promoted_hot = counter!("detector_mints_promoted_hot_total", "WARM/COLD -> HOT promotions");
        let mints_demoted_cold = counter!("detector_mints_demoted_cold_total", "HOT -> COLD TTL expiries");
        let alerts_created = counter!("detector_alerts_created_total", "Alert rows created");

        let consumer_lag_seconds = Gauge::with_opts(Opts::new("detector_consumer_lag_seconds", "Now minus most-recent processed block-time")).unwrap();
        registry.register(Box::new(consumer_lag_seconds.clone())).unwrap();

        let stream_backlog = IntGauge::with_opts(Opts::new("detector_stream_backlog", "Durable stream length")).unwrap();
        registry.register(Box::new(stream_backlog.clone())).unwrap();

        let alert_channel_sent = IntCounterVec::new(Opts::new("detector_alert_channel_sent_total", "Alerts sent per channel"), &["channel"]).unwrap();
        registry.register(Box::new(alert_channel_sent.clone())).unwrap();

        let alert_channel_retries = IntCounterVec::new(Opts::new("detector_alert_channel_retries_total", "Alert send retries per channel"), &["channel"]).unwrap();
        registry.register(Box::new(alert_channel_retries.clone())).unwrap();

        let alert_channel_errors = IntCounterVec::new(Opts::new("detector_alert_channel_errors_total", "Terminal alert send errors per channel"), &["channel"]).unwrap();
        registry.register(Box::new(alert_channel_errors.clone())).unwrap();

        let enrichment_credits_spent_today = IntGauge::with_opts(Opts::new("detector_enrichment_credits_spent_today", "Enrichment RPC credits spent today")).unwrap();
        registry.register(Box::new(enrichment_credits_spent_today.clone())).unwrap();

        let enrichment_degraded = IntGauge::with_opts(Opts::new("detector_enrichment_degraded", "1 if enrichment is in degraded/exhausted mode")).unwrap();
        registry.register(Box::new(enrichment_degraded.clone())).unwrap();

        Self {
            registry,
            entries_accepted,
            entries_rejected,
            entries_duplicate,
            entries_parse_failed,
            swaps_inferred,
            swaps_below_confidence,
            mints_promoted_warm,
            mints_promoted_hot,
            mints_demoted_cold,
            alerts_created,
            consumer_lag_seconds,
            stream_backlog,
            alert_channel_sent,
            alert_channel_retries,
            alert_channel_errors,
            enrichment_credits_spent_today,
            enrichment_degraded,
        }
    }
}

pub fn metrics() -> Arc<DetectorMetrics> {
    METRICS.clone()
}

pub fn init_metrics() {
    let _ = METRICS.clone();
}

/// Record the current degradation mode for the `/health` endpoint. The
/// Prometheus registry only holds counters/gauges we want graphed; mode is
/// small enough (3 values) that an atomic suffices and avoids pulling in a
/// label-per-mode gauge just to expose an enum.
pub fn set_mode(mode: crate::model::DegradationMode) {
    let value = match mode {
        crate::model::DegradationMode::Normal => 0,
        crate::model::DegradationMode::Degraded => 1,
        crate::model::DegradationMode::Critical => 2,
    };
    MODE.store(value, Ordering::Relaxed);
}

fn mode_label() -> &'static str {
    match MODE.load(Ordering::Relaxed) {
        0 => "NORMAL",
        1 => "DEGRADED",
        _ => "CRITICAL",
    }
}

pub async fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler));

    let listener = TcpListener::bind(&addr).await?;
    log::info!("metrics server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    let m = METRICS.clone();
    let encoder = prometheus::TextEncoder::new();
    match encoder.encode_to_string(&m.registry.gather()) {
        Ok(body) => (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {}", e)).into_response(),
    }
}

async fn health_handler() -> Response {
    let m = METRICS.clone();
    let body = serde_json::json!({
        "status": "healthy",
        "service": "detector",
        "mode": mode_label(),
        "consumer_lag_seconds": m.consumer_lag_seconds.get(),
        "stream_backlog": m.stream_backlog.get(),
        "enrichment_credits_spent_today": m.enrichment_credits_spent_today.get(),
        "enrichment_degraded": m.enrichment_degraded.get() == 1,
    });
    (StatusCode::OK, [("content-type", "application/json")], body.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_initialize_and_increment() {
        init_metrics();
        let m = metrics();
        m.entries_accepted.inc();
        assert!(m.entries_accepted.get() > 0);
    }

    #[test]
    fn alert_channel_counters_are_labeled_per_channel() {
        let m = metrics();
        m.alert_channel_sent.with_label_values(&["webhook"]).inc();
        m.alert_channel_sent.with_label_values(&["bot_api"]).inc();
        assert_eq!(m.alert_channel_sent.with_label_values(&["webhook"]).get(), 1);
    }

    #[test]
    fn mode_label_reflects_set_mode() {
        set_mode(crate::model::DegradationMode::Critical);
        assert_eq!(mode_label(), "CRITICAL");
        set_mode(crate::model::DegradationMode::Normal);
        assert_eq!(mode_label(), "NORMAL");
    }
}
