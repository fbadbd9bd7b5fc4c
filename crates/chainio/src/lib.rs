//! `ChainIO` is the RPC side of the miner: block lookups and head subscriptions.
use alloy::providers::{RootProvider, fillers::FillProvider, utils::JoinedRecommendedFillers};
use async_trait::async_trait;
use primitives::{
    errors::FetchError,
    headers::{HeaderStream, RawBlock},
};

mod connect;
mod source;

pub use connect::RetryWsConnect;
pub use source::{AlloyBlockSource, BlockEncoding};

/// Alias to the default provider with all recommended fillers (read-only).
pub type DefaultProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

/// Read access to a chain node.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch the block at `number` together with its transactions.
    async fn fetch_block_by_number(&self, number: u64) -> Result<RawBlock, FetchError>;

    /// Subscribe to new chain heads. The stream ends with an error item when
    /// the subscription is lost.
    async fn subscribe_new_heads(&self) -> Result<HeaderStream, FetchError>;
}
