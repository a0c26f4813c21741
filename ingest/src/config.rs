//! Configuration for the ingest adapter: gRPC endpoint, the set of programs
//! to subscribe to, and the durable-stream target. Mirrors
//! `data_mining::config::Config::load_or_default`'s TOML-first, env-secret
//! layering, trimmed to what the subscription-adapter + ingest-writer role
//! actually needs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub grpc: GrpcConfig,
    pub programs: ProgramConfig,
    pub stream: StreamConfig,
    pub monitoring: MonitoringConfig,
}

/// Chain-gateway (Yellowstone-style) subscription endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrpcConfig {
    pub endpoint: String,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub ping_interval_secs: u64,
}

/// The curated set of trading program ids the subscription filters on
/// (`transactions.account_include` in §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgramConfig {
    pub account_include: Vec<String>,
}

/// Durable-stream target the Ingest Writer appends to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    pub redis_url: String,
    pub stream_key: String,
    pub consumer_group: String,
    pub maxlen_approx: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&contents).with_context(|| format!("failed to parse config file: {}", path))?;
        Ok(config)
    }

    /// Tries `config.toml` first, then falls back to the checked-in
    /// `config.example.toml` so a fresh checkout still runs.
    pub fn load_or_default() -> Result<Self> {
        Self::load("config.toml")
            .or_else(|_| Self::load("config.example.toml"))
            .context("failed to load ingest configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_example_config() {
        let toml_str = r#"
            [grpc]
            endpoint = "http://127.0.0.1:10000"
            max_retries = 5
            retry_delay_secs = 2
            ping_interval_secs = 15

            [programs]
            account_include = ["pump111", "raydium111"]

            [stream]
            redis_url = "redis://127.0.0.1:6379"
            stream_key = "stream:tx"
            consumer_group = "parsers"
            maxlen_approx = 100000

            [monitoring]
            log_level = "info"
            json_logs = false
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.programs.account_include.len(), 2);
        assert_eq!(config.stream.stream_key, "stream:tx");
    }
}
