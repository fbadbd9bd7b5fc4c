use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::{
    errors::DecodeError,
    gas_stats::{GasStats, hex_digits},
    headers::{JsonBlock, NativeBlock, RawBlock},
};

/// Per-block gas metrics, as persisted in the `<chain>_block_metrics` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMetrics {
    /// Block number
    pub block_number: u64,
    /// Block time localized to the reference timezone
    pub block_time: DateTime<FixedOffset>,
    /// Raw block timestamp (seconds since epoch)
    pub block_timestamp: u64,
    /// Number of transactions
    pub transactions_count: usize,
    /// Encoded block size in bytes
    pub block_size_bytes: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas used
    pub gas_used: u64,
    /// `gas_used / gas_limit * 100`
    pub block_fullness: f64,
    /// Fee recipient (validator / coinbase)
    pub validator: String,
    /// Gas price distribution
    pub gas_stats: GasStats,
}

impl BlockMetrics {
    /// Build metrics from either representation of a raw block.
    pub fn from_raw(raw: &RawBlock, offset: FixedOffset) -> Result<Self, DecodeError> {
        match raw {
            RawBlock::Native(block) => Self::from_native(block, offset),
            RawBlock::Json(block) => Self::from_json(block, offset),
        }
    }

    /// Build metrics from an already decoded block.
    pub fn from_native(block: &NativeBlock, offset: FixedOffset) -> Result<Self, DecodeError> {
        Ok(Self {
            block_number: block.number,
            block_time: localize(block.timestamp, offset)?,
            block_timestamp: block.timestamp,
            transactions_count: block.gas_prices.len(),
            block_size_bytes: block.size,
            gas_limit: block.gas_limit,
            gas_used: block.gas_used,
            block_fullness: fullness(block.number, block.gas_used, block.gas_limit)?,
            validator: block.miner.to_checksum(None),
            gas_stats: GasStats::from_prices_wei(&block.gas_prices),
        })
    }

    /// Build metrics from the JSON-RPC wire form, decoding every hex quantity.
    pub fn from_json(block: &JsonBlock, offset: FixedOffset) -> Result<Self, DecodeError> {
        let block_number = decode_quantity("block number", &block.number)?;
        let block_timestamp = decode_quantity("timestamp", &block.timestamp)?;
        let block_size_bytes = decode_quantity("block size", &block.size)?;
        let gas_limit = decode_quantity("gas limit", &block.gas_limit)?;
        let gas_used = decode_quantity("gas used", &block.gas_used)?;

        Ok(Self {
            block_number,
            block_time: localize(block_timestamp, offset)?,
            block_timestamp,
            transactions_count: block.transactions.len(),
            block_size_bytes,
            gas_limit,
            gas_used,
            block_fullness: fullness(block_number, gas_used, gas_limit)?,
            validator: block.miner.clone(),
            gas_stats: GasStats::from_hex_prices(
                block.transactions.iter().map(|tx| tx.gas_price.as_str()),
            ),
        })
    }
}

/// Percentage of the gas limit consumed by the block.
#[allow(clippy::cast_precision_loss)]
fn fullness(number: u64, gas_used: u64, gas_limit: u64) -> Result<f64, DecodeError> {
    if gas_limit == 0 {
        return Err(DecodeError::ZeroGasLimit(number));
    }
    Ok(gas_used as f64 / gas_limit as f64 * 100.0)
}

fn localize(timestamp: u64, offset: FixedOffset) -> Result<DateTime<FixedOffset>, DecodeError> {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|utc| utc.with_timezone(&offset))
        .ok_or(DecodeError::TimestampOutOfRange(timestamp))
}

fn decode_quantity(field: &'static str, value: &str) -> Result<u64, DecodeError> {
    hex_digits(value)
        .and_then(|digits| u64::from_str_radix(digits, 16).ok())
        .ok_or_else(|| DecodeError::InvalidQuantity { field, value: value.to_owned() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::JsonTransaction;
    use alloy_primitives::address;
    use chrono::{Datelike, Timelike};

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn json_block() -> JsonBlock {
        JsonBlock {
            number: "0x10".to_owned(),
            // 2024-01-01T22:31:04Z
            timestamp: "0x65933d28".to_owned(),
            transactions: vec![
                JsonTransaction { gas_price: "0x3b9aca00".to_owned() },
                JsonTransaction { gas_price: "0xb2d05e00".to_owned() },
            ],
            size: "0x400".to_owned(),
            gas_limit: "0x1c9c380".to_owned(),
            gas_used: "0xe4e1c0".to_owned(),
            miner: "0x95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5".to_owned(),
        }
    }

    #[test]
    fn from_json_decodes_every_field() {
        let metrics = BlockMetrics::from_json(&json_block(), utc()).unwrap();
        assert_eq!(metrics.block_number, 16);
        assert_eq!(metrics.block_timestamp, 1_704_148_264);
        assert_eq!(metrics.transactions_count, 2);
        assert_eq!(metrics.block_size_bytes, 1024);
        assert_eq!(metrics.gas_limit, 30_000_000);
        assert_eq!(metrics.gas_used, 15_000_000);
        assert_eq!(metrics.block_fullness, 50.0);
        assert_eq!(metrics.validator, "0x95222290DD7278Aa3Ddd389Cc1E1d165CC4BAfe5");
        assert_eq!(metrics.gas_stats.all_prices, vec![1.0, 3.0]);
        assert_eq!(metrics.gas_stats.avg, 2.0);
    }

    #[test]
    fn fullness_matches_ratio_exactly() {
        let mut block = json_block();
        block.gas_used = "0x1".to_owned();
        block.gas_limit = "0x3".to_owned();
        let metrics = BlockMetrics::from_json(&block, utc()).unwrap();
        assert_eq!(metrics.block_fullness, 1.0 / 3.0 * 100.0);
        assert!(metrics.block_fullness.is_finite());
    }

    #[test]
    fn zero_gas_limit_is_a_decode_error() {
        let mut block = json_block();
        block.gas_limit = "0x0".to_owned();
        let err = BlockMetrics::from_json(&block, utc()).unwrap_err();
        assert_eq!(err, DecodeError::ZeroGasLimit(16));
    }

    #[test]
    fn malformed_field_is_named_in_error() {
        let mut block = json_block();
        block.gas_used = "fifteen".to_owned();
        let err = BlockMetrics::from_json(&block, utc()).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidQuantity { field: "gas used", value: "fifteen".to_owned() }
        );
        assert!(err.to_string().contains("gas used"));
    }

    #[test]
    fn quantities_accept_either_prefix_case() {
        let mut block = json_block();
        block.number = "0X10".to_owned();
        block.gas_limit = "0X1C9C380".to_owned();
        let metrics = BlockMetrics::from_json(&block, utc()).unwrap();
        assert_eq!(metrics.block_number, 16);
        assert_eq!(metrics.gas_limit, 30_000_000);

        block.gas_used = "0x".to_owned();
        assert!(matches!(
            BlockMetrics::from_json(&block, utc()),
            Err(DecodeError::InvalidQuantity { field: "gas used", .. })
        ));
    }

    #[test]
    fn block_without_transactions_is_valid() {
        let mut block = json_block();
        block.transactions.clear();
        let metrics = BlockMetrics::from_json(&block, utc()).unwrap();
        assert_eq!(metrics.transactions_count, 0);
        assert_eq!(metrics.gas_stats, GasStats::default());
    }

    #[test]
    fn block_time_is_localized_to_offset() {
        let moscow = FixedOffset::east_opt(3 * 3600).unwrap();
        let metrics = BlockMetrics::from_json(&json_block(), moscow).unwrap();
        // 22:31 UTC is already the next day at UTC+3.
        assert_eq!(metrics.block_time.day(), 2);
        assert_eq!(metrics.block_time.hour(), 1);
        assert_eq!(metrics.block_time.timestamp(), 1_704_148_264);
    }

    #[test]
    fn from_native_checksums_validator() {
        let miner = address!("95222290dd7278aa3ddd389cc1e1d165cc4bafe5");
        let block = NativeBlock {
            number: 7,
            timestamp: 1_700_000_000,
            size: 512,
            gas_limit: 100,
            gas_used: 25,
            miner,
            gas_prices: vec![2_000_000_000, 4_000_000_000],
        };
        let metrics = BlockMetrics::from_raw(&RawBlock::Native(block), utc()).unwrap();
        assert_eq!(metrics.block_fullness, 25.0);
        assert_eq!(metrics.transactions_count, 2);
        assert_eq!(metrics.validator, miner.to_checksum(None));
        assert!(
            metrics.validator.eq_ignore_ascii_case("0x95222290dd7278aa3ddd389cc1e1d165cc4bafe5")
        );
        assert_eq!(metrics.gas_stats.min, 2.0);
        assert_eq!(metrics.gas_stats.max, 4.0);
    }
}
