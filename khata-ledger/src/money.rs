//! Minor-unit rounding shared by every posting path.
//!
//! All supported currencies carry two decimal places. Intermediate products
//! keep full precision; only stored amounts are rounded, half to even.

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

pub const MINOR_UNIT_SCALE: u32 = 2;

#[must_use]
pub fn round_minor(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Transaction amount into base currency, rounded to minor units.
#[must_use]
pub fn to_base(amount: Decimal, exchange_rate: Decimal) -> Decimal {
    round_minor(amount * exchange_rate)
}
