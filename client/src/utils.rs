use serde::Deserialize;
use solana_program::pubkey::Pubkey;

use crate::error::ComposeError;

/// Decimal and lot scaling of a market, used to move between UI numbers and exchange lots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MarketScale {
    pub base_decimals: u8,
    pub quote_decimals: u8,
    pub base_lot_size: u64,
    pub quote_lot_size: u64,
}

impl MarketScale {
    fn base_multiplier(&self) -> f64 {
        10f64.powi(self.base_decimals as i32)
    }

    fn quote_multiplier(&self) -> f64 {
        10f64.powi(self.quote_decimals as i32)
    }

    /// Quote lots per base lot to UI price
    pub fn price_lots_to_number(&self, price: u64) -> f64 {
        if self.base_lot_size == 0 {
            return 0.0;
        }
        (price as f64 * self.quote_lot_size as f64 * self.base_multiplier())
            / (self.base_lot_size as f64 * self.quote_multiplier())
    }

    /// UI price to quote lots per base lot, rounded to the nearest lot
    pub fn price_number_to_lots(&self, price: f64) -> u64 {
        if self.quote_lot_size == 0 {
            return 0;
        }
        ((price * self.quote_multiplier() * self.base_lot_size as f64)
            / (self.base_multiplier() * self.quote_lot_size as f64))
            .round() as u64
    }

    /// Base lots to UI size
    pub fn base_size_lots_to_number(&self, size: u64) -> f64 {
        (size as f64 * self.base_lot_size as f64) / self.base_multiplier()
    }

    /// UI size to base lots, rounded to the nearest lot
    pub fn base_size_number_to_lots(&self, size: f64) -> u64 {
        if self.base_lot_size == 0 {
            return 0;
        }
        ((size * self.base_multiplier()) / self.base_lot_size as f64).round() as u64
    }

    /// Native quote units needed to pay for `base_lots` at `price_lots`
    pub fn max_native_quote(&self, price_lots: u64, base_lots: u64) -> Result<u64, ComposeError> {
        self.quote_lot_size
            .checked_mul(price_lots)
            .and_then(|v| v.checked_mul(base_lots))
            .ok_or(ComposeError::NumericalOverflow("max native quote quantity"))
    }

    /// Native base units of `base_lots`
    pub fn native_base(&self, base_lots: u64) -> Result<u64, ComposeError> {
        self.base_lot_size
            .checked_mul(base_lots)
            .ok_or(ComposeError::NumericalOverflow("native base quantity"))
    }
}

/// Deserialize a base58 address from its string form
pub(crate) fn deserialize_pubkey<'de, D>(deserializer: D) -> Result<Pubkey, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

pub(crate) fn deserialize_optional_pubkey<'de, D>(deserializer: D) -> Result<Option<Pubkey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    s.map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}
