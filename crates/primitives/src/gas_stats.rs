use serde::{Deserialize, Serialize};

/// Number of wei in one gwei.
pub const WEI_PER_GWEI: f64 = 1e9;

/// Gas price distribution of the transactions included in a block.
///
/// All values are expressed in gwei. A block without transactions (or whose
/// transactions all carry undecodable prices) yields [`GasStats::default`],
/// i.e. all scalars at zero and an empty price list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GasStats {
    /// Lowest gas price
    pub min: f64,
    /// Highest gas price
    pub max: f64,
    /// Arithmetic mean of the gas prices
    pub avg: f64,
    /// Population standard deviation of the gas prices
    pub stddev: f64,
    /// Every gas price, in transaction order
    pub all_prices: Vec<f64>,
}

impl GasStats {
    /// Compute statistics from gas prices expressed in wei.
    pub fn from_prices_wei(prices: &[u128]) -> Self {
        Self::from_gwei(prices.iter().map(|&wei| wei_to_gwei(wei)).collect())
    }

    /// Compute statistics from hex-encoded (`0x`-prefixed) wei gas prices, as
    /// found in the JSON-RPC block representation.
    ///
    /// Entries that fail to decode are skipped.
    pub fn from_hex_prices<'a, I>(prices: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::from_gwei(
            prices.into_iter().filter_map(decode_hex_u128).map(wei_to_gwei).collect(),
        )
    }

    fn from_gwei(all_prices: Vec<f64>) -> Self {
        if all_prices.is_empty() {
            return Self::default();
        }

        let count = all_prices.len() as f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &price in &all_prices {
            min = min.min(price);
            max = max.max(price);
            sum += price;
        }
        let avg = sum / count;

        let sum_sq: f64 = all_prices.iter().map(|price| (price - avg).powi(2)).sum();
        let stddev = (sum_sq / count).sqrt();

        Self { min, max, avg, stddev, all_prices }
    }

    /// Returns `true` when no gas price contributed to the statistics.
    pub fn is_empty(&self) -> bool {
        self.all_prices.is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn wei_to_gwei(wei: u128) -> f64 {
    wei as f64 / WEI_PER_GWEI
}

/// Digits of a `0x` or `0X` prefixed hex quantity, `None` when the prefix or
/// the digits are missing.
pub(crate) fn hex_digits(value: &str) -> Option<&str> {
    value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")).filter(|digits| !digits.is_empty())
}

/// Decode a `0x`-prefixed hex quantity into a `u128`.
pub(crate) fn decode_hex_u128(value: &str) -> Option<u128> {
    u128::from_str_radix(hex_digits(value)?, 16).ok()
}
