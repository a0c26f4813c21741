//! Balance-delta extraction and swap inference.
//!
//! Neither stage decodes venue-specific instruction data: both work purely
//! off pre/post balance snapshots, which keeps the detector agnostic to new
//! AMM programs as they show up on-chain.

pub mod builder;
pub mod inference;

pub use builder::DeltaBuilder;
pub use inference::SwapInferencer;
