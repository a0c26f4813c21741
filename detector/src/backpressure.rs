//! Backpressure controller and per-RPC circuit breaker.
//!
//! `BackpressureController` watches consumer lag and stream length and
//! derives a `DegradationMode`, which in turn gates three expensive stages
//! of the pipeline so the system degrades gracefully under load instead of
//! falling further and further behind. `CircuitBreaker` is the separate,
//! per-external-RPC mechanism that stops hammering a failing enrichment
//! endpoint.

use crate::model::DegradationMode;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct BackpressureController {
    degraded_lag_secs: f64,
    critical_lag_secs: f64,
    degraded_stream_len: usize,
    critical_stream_len: usize,
    check_interval: Duration,
    last_check: Mutex<Instant>,
    mode: Mutex<DegradationMode>,
}

impl BackpressureController {
    pub fn new(degraded_lag_secs: f64, critical_lag_secs: f64, degraded_stream_len: usize, critical_stream_len: usize) -> Self {
        Self {
            degraded_lag_secs,
            critical_lag_secs,
            degraded_stream_len,
            critical_stream_len,
            check_interval: Duration::from_secs(1),
            last_check: Mutex::new(Instant::now() - Duration::from_secs(10)),
            mode: Mutex::new(DegradationMode::Normal),
        }
    }

    /// Recompute the degradation mode, throttled to once per `check_interval`
    /// regardless of call frequency - lag/len sampling is cheap but this
    /// keeps the hot path from doing redundant work under load.
    pub fn update(&self, lag_secs: f64, stream_len: usize) -> DegradationMode {
        let mut last_check = self.last_check.lock().unwrap();
        if last_check.elapsed() < self.check_interval {
            return *self.mode.lock().unwrap();
        }
        *last_check = Instant::now();
        drop(last_check);

        let new_mode = Self::calculate_mode(
            lag_secs,
            stream_len,
            self.degraded_lag_secs,
            self.critical_lag_secs,
            self.degraded_stream_len,
            self.critical_stream_len,
        );
        *self.mode.lock().unwrap() = new_mode;
        new_mode
    }

    fn calculate_mode(
        lag_secs: f64,
        stream_len: usize,
        degraded_lag: f64,
        critical_lag: f64,
        degraded_len: usize,
        critical_len: usize,
    ) -> DegradationMode {
        if lag_secs > critical_lag || stream_len > critical_len {
            DegradationMode::Critical
        } else if lag_secs > degraded_lag || stream_len > degraded_len {
            DegradationMode::Degraded
        } else {
            DegradationMode::Normal
        }
    }

    pub fn mode(&self) -> DegradationMode {
        *self.mode.lock().unwrap()
    }

    /// Only in NORMAL mode do we pay the cost of fully parsing a transaction.
    pub fn should_parse_full(&self) -> bool {
        self.mode() == DegradationMode::Normal
    }

    /// Only in NORMAL mode do we persist swap events for later replay.
    pub fn should_store_swap_event(&self) -> bool {
        self.mode() == DegradationMode::Normal
    }

    /// Enrichment is skipped only once things are CRITICAL - it's cheaper to
    /// degrade DEGRADED mode by skipping full parse than by starving
    /// enrichment, which HOT-tier alerts depend on.
    pub fn should_enrich(&self) -> bool {
        self.mode() != DegradationMode::Critical
    }
}

/// Per-external-RPC circuit breaker: opens after `failure_threshold`
/// consecutive failures, half-opens after `recovery_timeout`.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    failures: AtomicU32,
    state: AtomicU8, // 0 = closed, 1 = open, 2 = half-open
    opened_at: AtomicU64,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            failures: AtomicU32::new(0),
            state: AtomicU8::new(CLOSED),
            opened_at: AtomicU64::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        match self.state.load(Ordering::SeqCst) {
            CLOSED => false,
            HALF_OPEN => false,
            OPEN => {
                let opened_at = self.opened_at.load(Ordering::SeqCst);
                let elapsed = now_millis().saturating_sub(opened_at);
                if elapsed >= self.recovery_timeout.as_millis() as u64 {
                    self.state.store(HALF_OPEN, Ordering::SeqCst);
                    false
                } else {
                    true
                }
            }
            _ => unreachable!(),
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.state.store(CLOSED, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.state.store(OPEN, Ordering::SeqCst);
            self.opened_at.store(now_millis(), Ordering::SeqCst);
        }
    }

    /// Run `f` only if the circuit isn't open, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        if self.is_open() {
            return Err(E::from(CircuitOpenError));
        }
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_mode_when_under_all_thresholds() {
        let controller = BackpressureController::new(5.0, 30.0, 50_000, 80_000);
        assert_eq!(controller.update(1.0, 100), DegradationMode::Normal);
    }

    #[test]
    fn degraded_mode_when_lag_exceeds_degraded_threshold() {
        let controller = BackpressureController::new(5.0, 30.0, 50_000, 80_000);
        assert_eq!(controller.update(6.0, 100), DegradationMode::Degraded);
    }

    #[test]
    fn critical_mode_when_stream_length_exceeds_critical_threshold() {
        let controller = BackpressureController::new(5.0, 30.0, 50_000, 80_000);
        assert_eq!(controller.update(1.0, 90_000), DegradationMode::Critical);
    }

    #[test]
    fn gates_follow_mode() {
        let controller = BackpressureController::new(5.0, 30.0, 50_000, 80_000);
        controller.update(40.0, 0);
        assert!(!controller.should_parse_full());
        assert!(!controller.should_store_swap_event());
        assert!(!controller.should_enrich());
    }

    #[test]
    fn circuit_breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
    }

    #[test]
    fn circuit_breaker_closes_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
