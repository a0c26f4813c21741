//! Durable profile store: token/wallet profiles and cluster edges, backed by
//! Postgres via a `deadpool-postgres` connection pool. This is what survives
//! a process restart - Redis's counters and hot-set are rebuilt from the
//! Delta Log on the next HOT promotion, but the profile history itself lives
//! here.

use crate::model::{Alert, SwapEvent, TokenProfile, TokenTier, WalletProfile};
use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::NoTls;

pub struct ProfileStore {
    pool: Pool,
}

impl ProfileStore {
    pub fn connect(host: &str, port: u16, user: &str, password: &str, dbname: &str) -> Result<Self> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(host.to_string());
        cfg.port = Some(port);
        cfg.user = Some(user.to_string());
        cfg.password = Some(password.to_string());
        cfg.dbname = Some(dbname.to_string());

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("failed to create postgres connection pool")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        client
            .batch_execute(
                "
                CREATE TABLE IF NOT EXISTS token_profiles (
                    mint TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    first_seen BIGINT NOT NULL,
                    last_seen BIGINT NOT NULL,
                    became_hot_at BIGINT,
                    total_buys BIGINT NOT NULL DEFAULT 0,
                    total_sells BIGINT NOT NULL DEFAULT 0,
                    total_volume_sol DOUBLE PRECISION NOT NULL DEFAULT 0,
                    unique_buyers BIGINT NOT NULL DEFAULT 0,
                    unique_sellers BIGINT NOT NULL DEFAULT 0,
                    trigger_reason TEXT,
                    name TEXT,
                    symbol TEXT,
                    decimals SMALLINT NOT NULL DEFAULT 9,
                    market_cap_usd DOUBLE PRECISION
                );
                CREATE TABLE IF NOT EXISTS wallet_profiles (
                    address TEXT PRIMARY KEY,
                    first_seen BIGINT NOT NULL,
                    last_seen BIGINT NOT NULL,
                    total_buys BIGINT NOT NULL DEFAULT 0,
                    total_sells BIGINT NOT NULL DEFAULT 0,
                    total_volume_sol DOUBLE PRECISION NOT NULL DEFAULT 0,
                    tokens_traded TEXT[] NOT NULL DEFAULT '{}',
                    cluster_id TEXT,
                    cluster_size INT NOT NULL DEFAULT 1,
                    funded_by TEXT
                );
                CREATE TABLE IF NOT EXISTS cluster_edges (
                    wallet_a TEXT NOT NULL,
                    wallet_b TEXT NOT NULL,
                    mint TEXT NOT NULL,
                    PRIMARY KEY (wallet_a, wallet_b, mint)
                );
                CREATE TABLE IF NOT EXISTS alerts (
                    id TEXT PRIMARY KEY,
                    mint TEXT NOT NULL,
                    trigger_reason TEXT NOT NULL,
                    coordination_score DOUBLE PRECISION NOT NULL,
                    confidence DOUBLE PRECISION NOT NULL,
                    risk_level TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    top_buyers JSONB NOT NULL,
                    cluster_summary TEXT NOT NULL,
                    market_cap_usd DOUBLE PRECISION,
                    enrichment_degraded BOOLEAN NOT NULL DEFAULT FALSE,
                    delivery JSONB NOT NULL,
                    created_at BIGINT NOT NULL
                );
                -- Per-swap rows, persisted only for WARM/HOT mints; short
                -- retention is enforced by the maintenance worker, not by
                -- Postgres itself.
                CREATE TABLE IF NOT EXISTS swap_events (
                    signature TEXT NOT NULL,
                    mint TEXT NOT NULL,
                    slot BIGINT NOT NULL,
                    block_time BIGINT,
                    venue TEXT NOT NULL,
                    user_wallet TEXT NOT NULL,
                    side TEXT NOT NULL,
                    base_amount BIGINT NOT NULL,
                    quote_mint TEXT NOT NULL,
                    quote_amount BIGINT NOT NULL,
                    confidence DOUBLE PRECISION NOT NULL,
                    created_at BIGINT NOT NULL,
                    PRIMARY KEY (signature, mint)
                );
                ",
            )
            .await
            .context("failed to run profile store migrations")?;
        Ok(())
    }

    pub async fn upsert_token_profile(&self, profile: &TokenProfile) -> Result<()> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        client
            .execute(
                "INSERT INTO token_profiles
                    (mint, state, first_seen, last_seen, became_hot_at, total_buys, total_sells,
                     total_volume_sol, unique_buyers, unique_sellers, trigger_reason, name, symbol,
                     decimals, market_cap_usd)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
                 ON CONFLICT (mint) DO UPDATE SET
                    state = EXCLUDED.state,
                    last_seen = EXCLUDED.last_seen,
                    became_hot_at = EXCLUDED.became_hot_at,
                    total_buys = EXCLUDED.total_buys,
                    total_sells = EXCLUDED.total_sells,
                    total_volume_sol = EXCLUDED.total_volume_sol,
                    unique_buyers = EXCLUDED.unique_buyers,
                    unique_sellers = EXCLUDED.unique_sellers,
                    trigger_reason = EXCLUDED.trigger_reason,
                    market_cap_usd = EXCLUDED.market_cap_usd",
                &[
                    &profile.mint,
                    &tier_to_str(profile.state),
                    &profile.first_seen,
                    &profile.last_seen,
                    &profile.became_hot_at,
                    &(profile.total_buys as i64),
                    &(profile.total_sells as i64),
                    &profile.total_volume_sol,
                    &(profile.unique_buyers as i64),
                    &(profile.unique_sellers as i64),
                    &profile.trigger_reason,
                    &profile.name,
                    &profile.symbol,
                    &(profile.decimals as i16),
                    &profile.market_cap_usd,
                ],
            )
            .await
            .context("failed to upsert token profile")?;
        Ok(())
    }

    pub async fn get_token_profile(&self, mint: &str) -> Result<Option<TokenProfile>> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        let row = client
            .query_opt(
                "SELECT mint, state, first_seen, last_seen, became_hot_at, total_buys, total_sells,
                        total_volume_sol, unique_buyers, unique_sellers, trigger_reason, name, symbol,
                        decimals, market_cap_usd
                 FROM token_profiles WHERE mint = $1",
                &[&mint],
            )
            .await
            .context("failed to query token profile")?;

        Ok(row.map(|row| TokenProfile {
            mint: row.get(0),
            state: str_to_tier(row.get(1)),
            first_seen: row.get(2),
            last_seen: row.get(3),
            became_hot_at: row.get(4),
            total_buys: row.get::<_, i64>(5) as u64,
            total_sells: row.get::<_, i64>(6) as u64,
            total_volume_sol: row.get(7),
            unique_buyers: row.get::<_, i64>(8) as u64,
            unique_sellers: row.get::<_, i64>(9) as u64,
            trigger_reason: row.get(10),
            name: row.get(11),
            symbol: row.get(12),
            decimals: row.get::<_, i16>(13) as u8,
            market_cap_usd: row.get(14),
        }))
    }

    pub async fn upsert_wallet_profile(&self, profile: &WalletProfile) -> Result<()> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        client
            .execute(
                "INSERT INTO wallet_profiles
                    (address, first_seen, last_seen, total_buys, total_sells, total_volume_sol,
                     tokens_traded, cluster_id, cluster_size, funded_by)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
                 ON CONFLICT (address) DO UPDATE SET
                    last_seen = EXCLUDED.last_seen,
                    total_buys = EXCLUDED.total_buys,
                    total_sells = EXCLUDED.total_sells,
                    total_volume_sol = EXCLUDED.total_volume_sol,
                    tokens_traded = EXCLUDED.tokens_traded,
                    cluster_id = EXCLUDED.cluster_id,
                    cluster_size = EXCLUDED.cluster_size,
                    funded_by = EXCLUDED.funded_by",
                &[
                    &profile.address,
                    &profile.first_seen,
                    &profile.last_seen,
                    &(profile.total_buys as i64),
                    &(profile.total_sells as i64),
                    &profile.total_volume_sol,
                    &profile.tokens_traded,
                    &profile.cluster_id,
                    &(profile.cluster_size as i32),
                    &profile.funded_by,
                ],
            )
            .await
            .context("failed to upsert wallet profile")?;
        Ok(())
    }

    pub async fn record_cluster_edge(&self, wallet_a: &str, wallet_b: &str, mint: &str) -> Result<()> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        let (a, b) = if wallet_a < wallet_b { (wallet_a, wallet_b) } else { (wallet_b, wallet_a) };
        client
            .execute(
                "INSERT INTO cluster_edges (wallet_a, wallet_b, mint) VALUES ($1,$2,$3)
                 ON CONFLICT DO NOTHING",
                &[&a, &b, &mint],
            )
            .await
            .context("failed to record cluster edge")?;
        Ok(())
    }

    /// Persist an alert row. The caller (the pipeline's HOT-transition path)
    /// is responsible for only calling this once per promotion - there is no
    /// dedup check here beyond the primary key on `id`.
    pub async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        let top_buyers = serde_json::to_value(&alert.top_buyers).context("failed to serialize top buyers")?;
        let delivery = serde_json::to_value(&alert.delivery).context("failed to serialize delivery flags")?;
        client
            .execute(
                "INSERT INTO alerts
                    (id, mint, trigger_reason, coordination_score, confidence, risk_level, summary,
                     top_buyers, cluster_summary, market_cap_usd, enrichment_degraded, delivery, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &alert.id,
                    &alert.mint,
                    &alert.trigger_reason,
                    &alert.coordination_score,
                    &alert.confidence,
                    &alert.risk_level,
                    &alert.summary,
                    &top_buyers,
                    &alert.cluster_summary,
                    &alert.market_cap_usd,
                    &alert.enrichment_degraded,
                    &delivery,
                    &alert.created_at,
                ],
            )
            .await
            .context("failed to insert alert")?;
        Ok(())
    }

    /// Persist a single swap, only called for WARM/HOT mints and only when
    /// the backpressure controller's `shouldStoreSwapEvent` gate is open.
    pub async fn insert_swap_event(&self, event: &SwapEvent, mint: &str, now: i64) -> Result<()> {
        let client = self.pool.get().await.context("failed to acquire pg connection")?;
        client
            .execute(
                "INSERT INTO swap_events
                    (signature, mint, slot, block_time, venue, user_wallet, side, base_amount,
                     quote_mint, quote_amount, confidence, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
                 ON CONFLICT (signature, mint) DO NOTHING",
                &[
                    &event.signature,
                    &mint,
                    &(event.slot as i64),
                    &event.block_time,
                    &event.venue,
                    &event.user_wallet,
                    &side_to_str(event.side),
                    &(event.base_amount as i64),
                    &event.quote_mint,
                    &(event.quote_amount as i64),
                    &event.confidence,
                    &now,
                ],
            )
            .await
            .context("failed to insert swap event")?;
        Ok(())
    }
}

fn side_to_str(side: crate::model::SwapSide) -> &'static str {
    match side {
        crate::model::SwapSide::Buy => "buy",
        crate::model::SwapSide::Sell => "sell",
    }
}

fn tier_to_str(tier: TokenTier) -> &'static str {
    match tier {
        TokenTier::Cold => "cold",
        TokenTier::Warm => "warm",
        TokenTier::Hot => "hot",
    }
}

fn str_to_tier(s: &str) -> TokenTier {
    match s {
        "warm" => TokenTier::Warm,
        "hot" => TokenTier::Hot,
        _ => TokenTier::Cold,
    }
}
