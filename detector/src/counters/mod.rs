//! Bucketed rolling counters: per-mint buy/sell counts, approximate unique
//! buyer/seller counts (HyperLogLog), volume, and per-wallet concentration,
//! over a short (5-minute) and long (1-hour) window.

pub mod backend;
pub mod store;

pub use backend::{CounterBackend, InMemoryCounterBackend, RedisCounterBackend, SwapRecord};
pub use store::CounterStore;
