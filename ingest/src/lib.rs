//! Yellowstone gRPC ingest: subscribes to transactions touching a curated
//! set of trading programs, decodes each one structurally (no program-aware
//! instruction parsing), and appends the result onto the durable stream the
//! detector's consumer pool reads from.

pub mod checkpoint;
pub mod config;
pub mod grpc;
pub mod writer;
