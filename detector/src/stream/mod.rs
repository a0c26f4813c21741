//! Durable, at-least-once transaction stream.
//!
//! Wraps a Redis Stream in consumer-group mode: `push_to_stream` is the
//! collector's only write path, `read_from_stream`/`ack_messages` back the
//! consumer pool, and idle messages older than the claim threshold are
//! reclaimed by `claim_stale`. The stream is capped with an approximate
//! MAXLEN so a stalled consumer group degrades gracefully instead of growing
//! Redis memory unbounded.

pub mod backend;
pub mod dedup;
pub mod consumer;

pub use backend::{InMemoryStreamBackend, RedisStreamBackend, StreamBackend, StreamMessage};
pub use dedup::{DedupBackend, DedupFilter, InMemoryDedupBackend, RedisDedupBackend};
pub use consumer::ConsumerPool;
