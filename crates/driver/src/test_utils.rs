//! In-memory block source used by the collector and pipeline tests.
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use chainio::BlockSource;
use futures::stream::{self, StreamExt};
use primitives::{
    errors::FetchError,
    headers::{Header, HeaderStream, NativeBlock, RawBlock},
};

/// Timestamp of block 0 (2024-01-01T00:00:00Z).
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200;

/// Seconds between consecutive mock blocks.
pub const BLOCK_TIME: u64 = 12;

/// Scripted [`BlockSource`]. Every block exists unless listed as failing.
#[derive(Debug, Default)]
pub struct MockBlockSource {
    failing: HashSet<u64>,
    zero_gas_limit: HashSet<u64>,
    transient: Mutex<HashMap<u64, u32>>,
    heads: Mutex<Vec<Result<Header, FetchError>>>,
    hold_open: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<u64>>,
}

impl MockBlockSource {
    /// Source where every block can be fetched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks that always fail with an rpc error.
    pub fn with_failing(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(numbers);
        self
    }

    /// Blocks returned with a zero gas limit, which fail to decode.
    pub fn with_zero_gas_limit(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.zero_gas_limit.extend(numbers);
        self
    }

    /// Fail block `number` `times` times before serving it.
    pub fn with_transient_failures(self, number: u64, times: u32) -> Self {
        self.transient.lock().unwrap().insert(number, times);
        self
    }

    /// Items yielded by the head subscription, in order.
    pub fn with_heads(self, heads: Vec<Result<Header, FetchError>>) -> Self {
        *self.heads.lock().unwrap() = heads;
        self
    }

    /// Keep the head subscription open after the scripted items.
    pub const fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Delay every fetch by `delay`.
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block numbers requested so far, in call order.
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().unwrap().clone()
    }

    /// Header announcing block `number`.
    pub fn head(number: u64) -> Header {
        Header {
            number,
            hash: B256::with_last_byte(number as u8),
            timestamp: GENESIS_TIMESTAMP + number * BLOCK_TIME,
        }
    }

    /// Block served for `number`.
    pub fn block(number: u64) -> NativeBlock {
        NativeBlock {
            number,
            timestamp: GENESIS_TIMESTAMP + number * BLOCK_TIME,
            size: 1024,
            gas_limit: 30_000_000,
            gas_used: 15_000_000,
            miner: Address::repeat_byte(0x11),
            gas_prices: vec![1_000_000_000, 3_000_000_000],
        }
    }
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn fetch_block_by_number(&self, number: u64) -> Result<RawBlock, FetchError> {
        self.calls.lock().unwrap().push(number);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&number) {
            return Err(FetchError::Rpc(format!("block {number} unavailable")));
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&number).filter(|left| **left > 0) {
                *remaining -= 1;
                return Err(FetchError::Rpc(format!("transient failure for block {number}")));
            }
        }
        let mut block = Self::block(number);
        if self.zero_gas_limit.contains(&number) {
            block.gas_limit = 0;
        }
        Ok(RawBlock::Native(block))
    }

    async fn subscribe_new_heads(&self) -> Result<HeaderStream, FetchError> {
        let heads = std::mem::take(&mut *self.heads.lock().unwrap());
        let scripted = stream::iter(heads);
        if self.hold_open {
            Ok(Box::pin(scripted.chain(stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }
}
