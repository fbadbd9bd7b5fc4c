//! Error types shared across the ingestion pipeline.
use thiserror::Error;

/// A required numeric field of a raw block could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The field is not a valid `0x`-prefixed hex quantity.
    #[error("failed to parse {field}: invalid quantity {value:?}")]
    InvalidQuantity {
        /// Name of the offending field
        field: &'static str,
        /// Raw value found in the block
        value: String,
    },
    /// The timestamp cannot be represented as a calendar date.
    #[error("failed to parse timestamp: {0} is out of range")]
    TimestampOutOfRange(u64),
    /// Fullness is undefined for a block with a zero gas limit.
    #[error("block {0} has a zero gas limit")]
    ZeroGasLimit(u64),
}

/// Fetching a block (or subscribing to heads) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport or upstream node error.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The node does not know the requested block.
    #[error("block {0} not found")]
    NotFound(u64),
    /// The block was fetched but could not be turned into metrics.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The head subscription ended.
    #[error("head subscription closed")]
    SubscriptionClosed,
    /// The fetch was abandoned because the pipeline is shutting down.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Returns `true` if the error was caused by cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A rate limiter wait was aborted because the cancellation token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limiter wait cancelled")]
pub struct LimiterCancelled;

impl From<LimiterCancelled> for FetchError {
    fn from(_: LimiterCancelled) -> Self {
        Self::Cancelled
    }
}
