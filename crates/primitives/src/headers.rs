//! Block header and raw block data structures, plus stream type aliases.
use std::pin::Pin;

use alloy_primitives::{Address, BlockHash};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::FetchError;

/// Chain head announced by a node subscription.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Header {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: BlockHash,
    /// Block timestamp
    pub timestamp: u64,
}

/// Stream of chain heads. A disconnect is reported as a terminal error item.
pub type HeaderStream = Pin<Box<dyn Stream<Item = Result<Header, FetchError>> + Send>>;

/// A block as returned by the RPC collaborator, before metrics are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBlock {
    /// Block already decoded into native integer types.
    Native(NativeBlock),
    /// Block in its JSON-RPC wire form, with hex-encoded quantities.
    Json(JsonBlock),
}

/// Decoded block fields relevant to gas metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBlock {
    /// Block number
    pub number: u64,
    /// Block timestamp (seconds since epoch)
    pub timestamp: u64,
    /// Encoded block size in bytes
    pub size: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas used
    pub gas_used: u64,
    /// Fee recipient
    pub miner: Address,
    /// Gas price of every transaction in wei, in transaction order
    pub gas_prices: Vec<u128>,
}

/// `eth_getBlockByNumber` response with full transaction objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonBlock {
    /// Hex block number
    pub number: String,
    /// Hex block timestamp
    pub timestamp: String,
    /// Transactions included in the block
    #[serde(default)]
    pub transactions: Vec<JsonTransaction>,
    /// Hex block size
    pub size: String,
    /// Hex gas limit
    pub gas_limit: String,
    /// Hex gas used
    pub gas_used: String,
    /// Fee recipient
    pub miner: String,
}

/// Transaction object as returned inside a [`JsonBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonTransaction {
    /// Hex gas price in wei
    #[serde(default)]
    pub gas_price: String,
}
