use alloy::providers::{Provider, ProviderBuilder};
use alloy_consensus::Transaction as _;
use alloy_rpc_client::ClientBuilder;
use alloy_rpc_types_eth::{Block, BlockNumberOrTag};
use async_trait::async_trait;
use derive_more::Debug;
use futures::{StreamExt, stream};
use primitives::{
    errors::FetchError,
    headers::{Header, HeaderStream, JsonBlock, NativeBlock, RawBlock},
};
use tracing::{debug, info};
use url::Url;

use crate::{BlockSource, DefaultProvider, RetryWsConnect};

/// Representation requested from the node for every fetched block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockEncoding {
    /// Typed alloy block, converted to [`NativeBlock`]
    #[default]
    Native,
    /// Raw `eth_getBlockByNumber` JSON, decoded by the metrics builder
    Json,
}

/// [`BlockSource`] backed by an alloy provider.
#[derive(Debug, Clone)]
pub struct AlloyBlockSource {
    #[debug(skip)]
    provider: DefaultProvider,
    encoding: BlockEncoding,
}

impl AlloyBlockSource {
    /// Connect over a reconnecting websocket. Required for head subscriptions.
    pub async fn connect_ws(url: Url) -> Result<Self, FetchError> {
        let ws = RetryWsConnect::from_url(url);
        let client = ClientBuilder::default().pubsub(ws).await.map_err(rpc_error)?;
        info!("connected to websocket rpc endpoint");
        Ok(Self::from_provider(ProviderBuilder::new().connect_client(client)))
    }

    /// Connect over HTTP. Head subscriptions are not available.
    pub fn connect_http(url: Url) -> Self {
        let client = ClientBuilder::default().http(url);
        Self::from_provider(ProviderBuilder::new().connect_client(client))
    }

    /// Wrap an already built provider.
    pub const fn from_provider(provider: DefaultProvider) -> Self {
        Self { provider, encoding: BlockEncoding::Native }
    }

    /// Select the block representation returned by
    /// [`BlockSource::fetch_block_by_number`].
    pub const fn with_encoding(mut self, encoding: BlockEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    async fn fetch_native(&self, number: u64) -> Result<RawBlock, FetchError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .full()
            .await
            .map_err(rpc_error)?
            .ok_or(FetchError::NotFound(number))?;
        Ok(RawBlock::Native(native_block(&block)))
    }

    async fn fetch_json(&self, number: u64) -> Result<RawBlock, FetchError> {
        let block: Option<JsonBlock> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), (BlockNumberOrTag::Number(number), true))
            .await
            .map_err(rpc_error)?;
        block.map(RawBlock::Json).ok_or(FetchError::NotFound(number))
    }
}

#[async_trait]
impl BlockSource for AlloyBlockSource {
    async fn fetch_block_by_number(&self, number: u64) -> Result<RawBlock, FetchError> {
        debug!(block_number = number, encoding = ?self.encoding, "fetching block");
        match self.encoding {
            BlockEncoding::Native => self.fetch_native(number).await,
            BlockEncoding::Json => self.fetch_json(number).await,
        }
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream, FetchError> {
        let subscription = self.provider.subscribe_blocks().await.map_err(rpc_error)?;
        info!("subscribed to new heads");
        let heads = subscription.into_stream().map(|head| {
            Ok(Header { number: head.number, hash: head.hash, timestamp: head.timestamp })
        });
        Ok(Box::pin(heads.chain(stream::once(async { Err(FetchError::SubscriptionClosed) }))))
    }
}

/// Extract the metric inputs of a full alloy block.
fn native_block(block: &Block) -> NativeBlock {
    let gas_prices = block
        .transactions
        .txns()
        .map(|tx| tx.effective_gas_price.unwrap_or_else(|| tx.max_fee_per_gas()))
        .collect();

    NativeBlock {
        number: block.header.number,
        timestamp: block.header.timestamp,
        size: block.header.size.map(|size| size.saturating_to::<u64>()).unwrap_or_default(),
        gas_limit: block.header.gas_limit,
        gas_used: block.header.gas_used,
        miner: block.header.beneficiary,
        gas_prices,
    }
}

fn rpc_error(err: impl std::fmt::Display) -> FetchError {
    FetchError::Rpc(err.to_string())
}
