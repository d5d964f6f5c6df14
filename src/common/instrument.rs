//! Instrument increments and their fixed64 encoding.
//!
//! An `Instrument` defines the quantization scale for one
//! exchange/symbol/date. It is immutable once a compile starts and is
//! persisted in the event log header as two fixed64 values (signed 64-bit
//! integers of 10^-12 units).

use crate::common::errors::PipelineError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Decimal places carried by the header's fixed64 encoding.
pub const FIXED64_SCALE: u32 = 12;

const FIXED64_ONE: i64 = 1_000_000_000_000;

/// Parse a plain decimal string without any rounding.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.is_empty() {
        return None;
    }
    Decimal::from_str_exact(text).ok()
}

/// Exact conversion to fixed64; `None` when the value needs more than
/// `FIXED64_SCALE` decimals or overflows `i64`.
pub fn decimal_to_fixed64(value: Decimal) -> Option<i64> {
    let scaled = value.checked_mul(Decimal::from(FIXED64_ONE))?;
    if !scaled.fract().is_zero() {
        return None;
    }
    scaled.trunc().to_i64()
}

pub fn fixed64_to_decimal(raw: i64) -> Decimal {
    Decimal::new(raw, FIXED64_SCALE).normalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instrument {
    price_increment: Decimal,
    amount_increment: Decimal,
}

impl Instrument {
    pub fn new(price_increment: Decimal, amount_increment: Decimal) -> Result<Self, PipelineError> {
        Ok(Self {
            price_increment: Self::check_increment("price_increment", price_increment)?,
            amount_increment: Self::check_increment("amount_increment", amount_increment)?,
        })
    }

    pub fn from_strings(price_increment: &str, amount_increment: &str) -> Result<Self, PipelineError> {
        let price = parse_decimal(price_increment).ok_or_else(|| {
            PipelineError::invalid_config(format!("price_increment {:?} is not a decimal", price_increment))
        })?;
        let amount = parse_decimal(amount_increment).ok_or_else(|| {
            PipelineError::invalid_config(format!(
                "amount_increment {:?} is not a decimal",
                amount_increment
            ))
        })?;
        Self::new(price, amount)
    }

    /// Rebuild from header values.
    pub fn from_fixed64(price_raw: i64, amount_raw: i64) -> Result<Self, PipelineError> {
        Self::new(fixed64_to_decimal(price_raw), fixed64_to_decimal(amount_raw))
    }

    fn check_increment(name: &str, value: Decimal) -> Result<Decimal, PipelineError> {
        if value <= Decimal::ZERO {
            return Err(PipelineError::invalid_config(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
        if decimal_to_fixed64(value).is_none() {
            return Err(PipelineError::invalid_config(format!(
                "{} {} is not representable with {} decimals",
                name, value, FIXED64_SCALE
            )));
        }
        Ok(value.normalize())
    }

    pub fn price_increment(&self) -> Decimal {
        self.price_increment
    }

    pub fn amount_increment(&self) -> Decimal {
        self.amount_increment
    }

    pub fn price_increment_fixed64(&self) -> i64 {
        // Validated at construction.
        decimal_to_fixed64(self.price_increment).unwrap_or_default()
    }

    pub fn amount_increment_fixed64(&self) -> i64 {
        decimal_to_fixed64(self.amount_increment).unwrap_or_default()
    }

    /// Decimal price of an integer tick count.
    pub fn price_of(&self, ticks: i64) -> Decimal {
        (Decimal::from(ticks) * self.price_increment).normalize()
    }

    /// Decimal amount of an integer lot count.
    pub fn amount_of(&self, lots: i64) -> Decimal {
        (Decimal::from(lots) * self.amount_increment).normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed64_roundtrip() {
        let d = parse_decimal("0.01").unwrap();
        let raw = decimal_to_fixed64(d).unwrap();
        assert_eq!(raw, 10_000_000_000);
        assert_eq!(fixed64_to_decimal(raw), d);
    }

    #[test]
    fn test_fixed64_rejects_excess_precision() {
        let d = parse_decimal("0.0000000000001").unwrap();
        assert!(decimal_to_fixed64(d).is_none());
    }

    #[test]
    fn test_instrument_rejects_non_positive() {
        assert!(Instrument::from_strings("0", "1").is_err());
        assert!(Instrument::from_strings("0.01", "-1").is_err());
        assert!(Instrument::from_strings("abc", "1").is_err());
    }

    #[test]
    fn test_instrument_header_roundtrip_normalizes() {
        let inst = Instrument::from_strings("0.010", "0.001").unwrap();
        let back = Instrument::from_fixed64(
            inst.price_increment_fixed64(),
            inst.amount_increment_fixed64(),
        )
        .unwrap();
        assert_eq!(inst, back);
        assert_eq!(inst.price_increment().to_string(), "0.01");
    }

    #[test]
    fn test_parse_decimal_rejects_empty() {
        assert!(parse_decimal("").is_none());
        assert!(parse_decimal("1.5x").is_none());
    }
}
