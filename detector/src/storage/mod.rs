//! Durable storage outside Redis: the two flat-file logs used for HOT-token
//! backfill and historical audit, and the Postgres-backed profile store that
//! survives process restarts (unlike Redis's ephemeral counters).

pub mod delta_log;
pub mod touch_log;
pub mod profile_store;

pub use delta_log::DeltaLog;
pub use touch_log::TouchLog;
pub use profile_store::ProfileStore;
