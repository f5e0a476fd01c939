//! Decimal arithmetic for prices and amounts.
//!
//! Every derived price and amount in this crate carries at most 8
//! fractional digits; intermediate divisions are carried to the same
//! precision. Binary floating point is never used for money.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits carried by derived prices and amounts.
pub const SCALE: u32 = 8;

/// Truncate toward zero to [`SCALE`] fractional digits.
pub fn round_down8(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::ToZero)
}

/// Divide at the crate-wide precision. Returns zero for a zero divisor.
pub fn div8(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    (numerator / denominator).round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}
