//! Core primitives for the block metrics pipeline.
/// Per-block metrics derived from raw blocks
pub mod block_metrics;
/// Shared error types
pub mod errors;
/// Gas price distribution statistics
pub mod gas_stats;
/// Block header and raw block types
pub mod headers;
/// Token bucket rate limiter
pub mod rate_limiter;
/// Bounded retry helpers
pub mod retries;
