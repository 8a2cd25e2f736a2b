//! Decimal-place policy per tick size and the exact rounding primitives the
//! exchange applies to prices, sizes and amounts.
//!
//! | Tick     | Price | Size | Amount |
//! |----------|-------|------|--------|
//! | `0.1`    | 1     | 2    | 3      |
//! | `0.01`   | 2     | 2    | 4      |
//! | `0.001`  | 3     | 2    | 5      |
//! | `0.0001` | 4     | 2    | 6      |

use phf::phf_map;
use rust_decimal::RoundingStrategy;

use crate::Result;
use crate::error::Error;
use crate::types::{Decimal, dec};

/// Fractional digits of the collateral token.
pub const USDC_DECIMALS: u32 = 6;

const BASE_UNIT: Decimal = dec!(1_000_000);

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickPolicy {
    pub price_decimals: u32,
    pub size_decimals: u32,
    pub amount_decimals: u32,
}

impl TickPolicy {
    /// Scale at which the product of price and size is truncated.
    #[must_use]
    pub const fn truncation_scale(&self) -> u32 {
        self.price_decimals + self.size_decimals
    }
}

static POLICIES: phf::Map<&'static str, TickPolicy> = phf_map! {
    "0.1" => TickPolicy { price_decimals: 1, size_decimals: 2, amount_decimals: 3 },
    "0.01" => TickPolicy { price_decimals: 2, size_decimals: 2, amount_decimals: 4 },
    "0.001" => TickPolicy { price_decimals: 3, size_decimals: 2, amount_decimals: 5 },
    "0.0001" => TickPolicy { price_decimals: 4, size_decimals: 2, amount_decimals: 6 },
};

pub fn policy_for(tick_size: &str) -> Result<TickPolicy> {
    POLICIES
        .get(tick_size)
        .copied()
        .ok_or_else(|| Error::unsupported_tick_size(tick_size))
}

/// Truncates toward zero.
#[must_use]
pub fn truncate_down(value: Decimal, places: u32) -> Decimal {
    value.trunc_with_scale(places)
}

/// Rounds half away from zero.
#[must_use]
pub fn round_nearest(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds away from zero. Only meaningful for positive values.
#[must_use]
pub fn round_up(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::AwayFromZero)
}

#[must_use]
pub fn decimal_places(value: Decimal) -> u32 {
    value.scale()
}

/// `value × 10^6`, truncated and rendered without a decimal point.
#[must_use]
pub fn to_base_units(value: Decimal) -> String {
    let mut units = (value * BASE_UNIT).trunc();
    units.rescale(0);
    units.to_string()
}
