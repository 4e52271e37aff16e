//! Fixed-precision decimal helpers shared by every monetary computation.
//!
//! All amounts are [`rust_decimal::Decimal`]. Rounding is round-half-up
//! (away from zero on the midpoint) and is only applied where a caller asks
//! for it, so intermediate sums keep their full precision.
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Number of fractional digits carried by every monetary amount in an invoice.
pub const MONEY_SCALE: u32 = 2;

/// Rejected numeric input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecimalError {
    #[error("non-finite numeric input: {value}")]
    NonFinite { value: f64 },
    #[error("numeric input out of range: {value}")]
    OutOfRange { value: f64 },
    #[error("invalid decimal literal: {input}")]
    Invalid { input: String },
}

/// Round `value` to `places` fractional digits, half-up.
///
/// Rounding an already-rounded value returns it unchanged.
///
/// # Examples
/// ```rust
/// use rust_decimal::Decimal;
/// use zatca_egs::decimal::round;
///
/// let v = Decimal::new(1005, 3); // 1.005
/// assert_eq!(round(v, 2), Decimal::new(101, 2));
/// assert_eq!(round(round(v, 2), 2), Decimal::new(101, 2));
/// ```
pub fn round(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to [`MONEY_SCALE`] places.
pub fn round_money(value: Decimal) -> Decimal {
    round(value, MONEY_SCALE)
}

/// Render `value` rounded half-up to exactly `places` fractional digits.
///
/// Trailing zeros are kept, so `to_fixed_exact(5, 2)` is `"5.00"`.
pub fn to_fixed_exact(value: Decimal, places: u32) -> String {
    let mut rounded = round(value, places);
    rounded.rescale(places);
    rounded.to_string()
}

/// Convert a float into a decimal, rejecting NaN and infinities.
pub fn from_f64(value: f64) -> Result<Decimal, DecimalError> {
    if !value.is_finite() {
        return Err(DecimalError::NonFinite { value });
    }
    // Going through the shortest round-trip string keeps `0.1` as `0.1`
    // instead of its binary expansion.
    Decimal::from_str(&value.to_string())
        .or_else(|_| Decimal::from_scientific(&format!("{value:e}")))
        .map_err(|_| DecimalError::OutOfRange { value })
}

/// Parse a decimal literal such as `"22.50"`.
pub fn parse(input: &str) -> Result<Decimal, DecimalError> {
    Decimal::from_str(input.trim()).map_err(|_| DecimalError::Invalid {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up() {
        assert_eq!(round(dec!(0.015), 2), dec!(0.02));
        assert_eq!(round(dec!(0.045), 2), dec!(0.05));
        assert_eq!(round(dec!(0.044999), 2), dec!(0.04));
        assert_eq!(round(dec!(-0.015), 2), dec!(-0.02));
    }

    #[test]
    fn rounding_is_idempotent() {
        for v in [dec!(1.005), dec!(138.6), dec!(0.045), dec!(99.999)] {
            let once = round(v, 2);
            assert_eq!(round(once, 2), once);
        }
    }

    #[test]
    fn fixed_exact_pads_and_rounds() {
        assert_eq!(to_fixed_exact(dec!(5), 2), "5.00");
        assert_eq!(to_fixed_exact(dec!(1144.1), 2), "1144.10");
        assert_eq!(to_fixed_exact(dec!(1.2345), 3), "1.235");
        assert_eq!(to_fixed_exact(dec!(0.15), 0), "0");
    }

    #[test]
    fn from_f64_rejects_non_finite() {
        assert_eq!(
            from_f64(f64::NAN).unwrap_err().to_string(),
            "non-finite numeric input: NaN"
        );
        assert!(matches!(
            from_f64(f64::INFINITY),
            Err(DecimalError::NonFinite { .. })
        ));
        assert!(matches!(
            from_f64(f64::NEG_INFINITY),
            Err(DecimalError::NonFinite { .. })
        ));
    }

    #[test]
    fn from_f64_keeps_short_representation() {
        assert_eq!(from_f64(0.1).unwrap(), dec!(0.1));
        assert_eq!(from_f64(22.0).unwrap(), dec!(22));
        assert_eq!(from_f64(0.1 + 0.2).unwrap(), dec!(0.30000000000000004));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse(" 22.50 ").unwrap(), dec!(22.50));
        assert!(matches!(parse("abc"), Err(DecimalError::Invalid { .. })));
    }
}
