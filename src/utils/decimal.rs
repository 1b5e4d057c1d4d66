//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Express a fractional rate as a percentage (0.0001 -> 0.01).
pub fn to_percent(rate: Decimal) -> Decimal {
    rate * dec!(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.001)), dec!(1.567));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.01)), dec!(1.56));
        assert_eq!(round_down_to_lot(dec!(1.567), dec!(0.1)), dec!(1.5));
        assert_eq!(round_down_to_lot(dec!(7), dec!(5)), dec!(5));
    }

    #[test]
    fn test_to_percent() {
        assert_eq!(to_percent(dec!(0.0001)), dec!(0.01));
        assert_eq!(to_percent(dec!(-0.0012)), dec!(-0.12));
    }
}
