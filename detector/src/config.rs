//! Configuration management for the cabal detector service
//!
//! Loads configuration from environment variables (via a .env file) and provides
//! validated, type-safe access to all service parameters. Trigger thresholds live
//! in a separate YAML file (see `triggers::TriggerEvaluator`) so they can be
//! hot-reloaded without restarting the process.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Complete configuration for the cabal detector service
#[derive(Debug, Clone)]
pub struct Config {
    pub redis: RedisConfig,
    pub postgres: PostgresConfig,
    pub logs: LogConfig,
    pub counters: CounterConfig,
    pub consumer: ConsumerConfig,
    pub state: StateConfig,
    pub backpressure: BackpressureConfig,
    pub enrichment: EnrichmentConfig,
    pub alerts: AlertsConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Redis connection (durable stream, dedup set, bucketed counters, hot-token cache)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub stream_key: String,
    pub consumer_group: String,
    pub stream_maxlen_approx: usize,
}

/// PostgreSQL connection (durable token/wallet profiles, cluster edges)
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl PostgresConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.dbname
        )
    }
}

/// Delta Log / Touch Log on-disk retention and rotation
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub delta_log_dir: PathBuf,
    pub touch_log_dir: PathBuf,
    pub delta_log_retention_minutes: u64,
    pub delta_log_rotation_secs: u64,
    pub touch_log_rotation_secs: u64,
    pub touch_log_flush_bytes: usize,
}

/// Rolling counter window/bucket configuration
#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub short_window_secs: u64,
    pub short_bucket_secs: u64,
    pub long_window_secs: u64,
    pub long_bucket_secs: u64,
    pub stats_cache_ttl_ms: u64,
    pub wallet_first_seen_ttl_secs: u64,
}

/// Consumer pool sizing and claim behavior
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub pool_size: usize,
    pub batch_size: usize,
    pub block_ms: usize,
    pub claim_idle_ms: u64,
    pub maintenance_interval_secs: u64,
}

/// Tier state machine (COLD/WARM/HOT) timers
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub hot_ttl_secs: u64,
    pub hot_refresh_interval_secs: u64,
    pub warm_to_hot_mcap_floor_usd: f64,
}

/// Backpressure thresholds (lag and stream length)
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    pub degraded_lag_secs: f64,
    pub critical_lag_secs: f64,
    pub degraded_stream_len: usize,
    pub critical_stream_len: usize,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout_secs: u64,
}

/// Enrichment RPC credit budget
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub daily_credit_budget: u64,
    pub degraded_budget_fraction: f64,
    pub rpc_url: String,
}

/// Alert dispatch channels and rate limiting
#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
    pub bot_api_token: String,
    pub bot_api_chat_id: String,
    pub per_minute_rate_limit: u32,
}

/// HTTP surface (metrics + health)
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub metrics_port: u16,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Expects a .env file in the working directory or environment variables to be set.
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        Ok(Config {
            redis: RedisConfig {
                url: get_env_string("REDIS_URL", "redis://127.0.0.1:6379")?,
                stream_key: get_env_string("REDIS_STREAM_KEY", "stream:tx")?,
                consumer_group: get_env_string("REDIS_CONSUMER_GROUP", "parsers")?,
                stream_maxlen_approx: get_env_usize("REDIS_STREAM_MAXLEN", 1_000_000)?,
            },
            postgres: PostgresConfig {
                host: get_env_string("POSTGRES_HOST", "localhost")?,
                port: get_env_u16("POSTGRES_PORT", 5432)?,
                user: get_env_string("POSTGRES_USER", "detector")?,
                password: get_env_string("POSTGRES_PASSWORD", "")?,
                dbname: get_env_string("POSTGRES_DB", "cabal_detector")?,
            },
            logs: LogConfig {
                delta_log_dir: PathBuf::from(get_env_string("DELTA_LOG_DIR", "./data/delta_log")?),
                touch_log_dir: PathBuf::from(get_env_string("TOUCH_LOG_DIR", "./data/touch_log")?),
                delta_log_retention_minutes: get_env_u64("DELTA_LOG_RETENTION_MINUTES", 60)?,
                delta_log_rotation_secs: get_env_u64("DELTA_LOG_ROTATION_SECS", 300)?,
                touch_log_rotation_secs: get_env_u64("TOUCH_LOG_ROTATION_SECS", 86400)?,
                touch_log_flush_bytes: get_env_usize("TOUCH_LOG_FLUSH_BYTES", 1024 * 1024)?,
            },
            counters: CounterConfig {
                short_window_secs: get_env_u64("COUNTER_SHORT_WINDOW_SECS", 300)?,
                short_bucket_secs: get_env_u64("COUNTER_SHORT_BUCKET_SECS", 60)?,
                long_window_secs: get_env_u64("COUNTER_LONG_WINDOW_SECS", 3600)?,
                long_bucket_secs: get_env_u64("COUNTER_LONG_BUCKET_SECS", 300)?,
                stats_cache_ttl_ms: get_env_u64("COUNTER_STATS_CACHE_TTL_MS", 1000)?,
                wallet_first_seen_ttl_secs: get_env_u64("WALLET_FIRST_SEEN_TTL_SECS", 7 * 86400)?,
            },
            consumer: ConsumerConfig {
                pool_size: get_env_usize("CONSUMER_POOL_SIZE", 4)?,
                batch_size: get_env_usize("CONSUMER_BATCH_SIZE", 100)?,
                block_ms: get_env_usize("CONSUMER_BLOCK_MS", 2000)?,
                claim_idle_ms: get_env_u64("CONSUMER_CLAIM_IDLE_MS", 30_000)?,
                maintenance_interval_secs: get_env_u64("MAINTENANCE_INTERVAL_SECS", 30)?,
            },
            state: StateConfig {
                hot_ttl_secs: get_env_u64("HOT_TTL_SECS", 3600)?,
                hot_refresh_interval_secs: get_env_u64("HOT_REFRESH_INTERVAL_SECS", 60)?,
                warm_to_hot_mcap_floor_usd: get_env_f64("WARM_TO_HOT_MCAP_FLOOR_USD", 10_000.0)?,
            },
            backpressure: BackpressureConfig {
                degraded_lag_secs: get_env_f64("BACKPRESSURE_DEGRADED_LAG_SECS", 5.0)?,
                critical_lag_secs: get_env_f64("BACKPRESSURE_CRITICAL_LAG_SECS", 30.0)?,
                degraded_stream_len: get_env_usize("BACKPRESSURE_DEGRADED_STREAM_LEN", 50_000)?,
                critical_stream_len: get_env_usize("BACKPRESSURE_CRITICAL_STREAM_LEN", 80_000)?,
                circuit_failure_threshold: get_env_u32("CIRCUIT_FAILURE_THRESHOLD", 5)?,
                circuit_recovery_timeout_secs: get_env_u64("CIRCUIT_RECOVERY_TIMEOUT_SECS", 30)?,
            },
            enrichment: EnrichmentConfig {
                daily_credit_budget: get_env_u64("ENRICHMENT_DAILY_CREDIT_BUDGET", 300_000)?,
                degraded_budget_fraction: get_env_f64("ENRICHMENT_DEGRADED_FRACTION", 0.8)?,
                rpc_url: get_env_string("RPC_URL", "https://api.mainnet-beta.solana.com")?,
            },
            alerts: AlertsConfig {
                webhook_url: env::var("ALERT_WEBHOOK_URL").ok(),
                bot_api_token: get_env_string("ALERT_BOT_API_TOKEN", "")?,
                bot_api_chat_id: get_env_string("ALERT_BOT_API_CHAT_ID", "")?,
                per_minute_rate_limit: get_env_u32("ALERT_PER_MINUTE_RATE_LIMIT", 20)?,
            },
            network: NetworkConfig {
                metrics_port: get_env_u16("METRICS_PORT", 9090)?,
            },
            logging: LoggingConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
            },
        })
    }

    /// Validate configuration values are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.redis.url.is_empty() {
            anyhow::bail!("REDIS_URL must be set");
        }
        if self.redis.stream_maxlen_approx == 0 {
            anyhow::bail!("REDIS_STREAM_MAXLEN must be > 0");
        }
        if self.counters.short_window_secs % self.counters.short_bucket_secs != 0 {
            anyhow::bail!("COUNTER_SHORT_WINDOW_SECS must be a multiple of COUNTER_SHORT_BUCKET_SECS");
        }
        if self.counters.long_window_secs % self.counters.long_bucket_secs != 0 {
            anyhow::bail!("COUNTER_LONG_WINDOW_SECS must be a multiple of COUNTER_LONG_BUCKET_SECS");
        }
        if self.consumer.pool_size == 0 {
            anyhow::bail!("CONSUMER_POOL_SIZE must be > 0");
        }
        if self.backpressure.degraded_lag_secs >= self.backpressure.critical_lag_secs {
            anyhow::bail!("BACKPRESSURE_DEGRADED_LAG_SECS must be < BACKPRESSURE_CRITICAL_LAG_SECS");
        }
        if self.backpressure.degraded_stream_len >= self.backpressure.critical_stream_len {
            anyhow::bail!("BACKPRESSURE_DEGRADED_STREAM_LEN must be < BACKPRESSURE_CRITICAL_STREAM_LEN");
        }
        if self.enrichment.degraded_budget_fraction <= 0.0 || self.enrichment.degraded_budget_fraction > 1.0 {
            anyhow::bail!("ENRICHMENT_DEGRADED_FRACTION must be between 0 and 1");
        }
        if self.postgres.password.is_empty() {
            log::warn!("POSTGRES_PASSWORD is empty - this may cause connection issues");
        }
        if self.alerts.webhook_url.is_none() && self.alerts.bot_api_token.is_empty() {
            log::warn!("no alert channel configured - alerts will be dropped on the floor");
        }
        Ok(())
    }
}

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn get_env_u16(key: &str, default: u16) -> Result<u16> {
    env::var(key).ok().and_then(|s| s.parse().ok()).or(Some(default)).context(format!("invalid {}", key))
}

fn get_env_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key).ok().and_then(|s| s.parse().ok()).or(Some(default)).context(format!("invalid {}", key))
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key).ok().and_then(|s| s.parse().ok()).or(Some(default)).context(format!("invalid {}", key))
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key).ok().and_then(|s| s.parse().ok()).or(Some(default)).context(format!("invalid {}", key))
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key).ok().and_then(|s| s.parse().ok()).or(Some(default)).context(format!("invalid {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation_success() {
        let config = Config::from_env().expect("failed to load config");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_lag_thresholds() {
        let mut config = Config::from_env().expect("failed to load config");
        config.backpressure.degraded_lag_secs = 40.0;
        config.backpressure.critical_lag_secs = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_bucket_alignment() {
        let mut config = Config::from_env().expect("failed to load config");
        config.counters.short_window_secs = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_postgres_connection_string() {
        let pg = PostgresConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "testuser".to_string(),
            password: "testpass".to_string(),
            dbname: "testdb".to_string(),
        };
        let conn_str = pg.connection_string();
        assert!(conn_str.contains("host=localhost"));
        assert!(conn_str.contains("dbname=testdb"));
    }
}
