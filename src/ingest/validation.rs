//! Schema Validator
//!
//! Per-row structural and monotonicity checks. The only state is the
//! `local_timestamp` watermark threaded through the row stream.
//!
//! Validation is split in two so the batch assembler can learn a row's
//! timestamp group before deciding its fate:
//! 1. `check_timestamp` - column count, `local_timestamp` parse, monotonicity
//! 2. `check_fields`    - everything else

use crate::common::errors::{PipelineError, RowRef};
use crate::common::instrument::parse_decimal;
use crate::common::types::{Side, NANOS_PER_MICRO};
use crate::ingest::csv_source::{Column, RawRow, TARDIS_L2_COLUMNS};
use rust_decimal::Decimal;

/// A structurally valid row; price/amount are still decimal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRow {
    pub row: RowRef,
    pub exchange: String,
    pub symbol: String,
    pub exchange_timestamp_us: i64,
    pub local_timestamp_us: i64,
    pub is_snapshot: bool,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub price_text: String,
    pub amount_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    last_timestamp_us: Option<i64>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self) -> Option<i64> {
        self.last_timestamp_us
    }

    /// Check the row shape and its receive timestamp. On success the
    /// watermark advances to the row's timestamp.
    pub fn check_timestamp(&mut self, row: &RawRow) -> Result<i64, PipelineError> {
        let at = row.row_ref();
        if row.fields.len() != TARDIS_L2_COLUMNS.len() {
            return Err(PipelineError::schema_row(
                at,
                format!(
                    "expected {} columns, found {}",
                    TARDIS_L2_COLUMNS.len(),
                    row.fields.len()
                ),
            ));
        }
        let ts = parse_timestamp(row, Column::LocalTimestamp)?;
        if ts.checked_mul(NANOS_PER_MICRO).is_none() {
            return Err(PipelineError::schema_row(
                at,
                format!("local_timestamp {} overflows nanoseconds", ts),
            ));
        }
        if let Some(previous) = self.last_timestamp_us {
            if ts < previous {
                return Err(PipelineError::NonMonotonicTimestamp {
                    row: at,
                    previous_us: previous,
                    current_us: ts,
                });
            }
        }
        self.last_timestamp_us = Some(ts);
        Ok(ts)
    }

    /// Check every remaining field of a row whose timestamp already passed.
    pub fn check_fields(&self, row: &RawRow, local_timestamp_us: i64) -> Result<ValidatedRow, PipelineError> {
        let at = row.row_ref();
        let exchange = required(row, Column::Exchange)?;
        let symbol = required(row, Column::Symbol)?;
        let exchange_timestamp_us = parse_timestamp(row, Column::Timestamp)?;

        let is_snapshot = match required(row, Column::IsSnapshot)? {
            "true" => true,
            "false" => false,
            other => {
                return Err(PipelineError::schema_row(
                    at,
                    format!("is_snapshot must be true or false, got {:?}", other),
                ))
            }
        };

        let side_text = required(row, Column::Side)?;
        let side = Side::parse(side_text).ok_or_else(|| {
            PipelineError::schema_row(at, format!("side must be bid or ask, got {:?}", side_text))
        })?;

        let price_text = required(row, Column::Price)?;
        let price = parse_non_negative(row, Column::Price, price_text)?;
        if price.is_zero() {
            return Err(PipelineError::schema_row(at, "price must be positive"));
        }
        let amount_text = required(row, Column::Amount)?;
        let amount = parse_non_negative(row, Column::Amount, amount_text)?;

        Ok(ValidatedRow {
            row: at,
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            exchange_timestamp_us,
            local_timestamp_us,
            is_snapshot,
            side,
            price,
            amount,
            price_text: price_text.to_string(),
            amount_text: amount_text.to_string(),
        })
    }

    pub fn validate(&mut self, row: &RawRow) -> Result<ValidatedRow, PipelineError> {
        let ts = self.check_timestamp(row)?;
        self.check_fields(row, ts)
    }
}

fn required(row: &RawRow, column: Column) -> Result<&str, PipelineError> {
    match row.field(column) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(PipelineError::schema_row(
            row.row_ref(),
            format!("missing {}", column.name()),
        )),
    }
}

fn parse_timestamp(row: &RawRow, column: Column) -> Result<i64, PipelineError> {
    let text = required(row, column)?;
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::schema_row(
            row.row_ref(),
            format!("{} must be a non-negative integer, got {:?}", column.name(), text),
        ));
    }
    text.parse::<i64>().map_err(|_| {
        PipelineError::schema_row(
            row.row_ref(),
            format!("{} out of range: {}", column.name(), text),
        )
    })
}

fn parse_non_negative(row: &RawRow, column: Column, text: &str) -> Result<Decimal, PipelineError> {
    let value = parse_decimal(text).ok_or_else(|| {
        PipelineError::schema_row(
            row.row_ref(),
            format!("{} is not a decimal: {:?}", column.name(), text),
        )
    })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PipelineError::schema_row(
            row.row_ref(),
            format!("{} must be non-negative, got {}", column.name(), text),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: u64, fields: &[&str]) -> RawRow {
        RawRow::new(index, index + 2, fields.iter().map(|s| s.to_string()).collect())
    }

    fn good(index: u64, ts: &str) -> RawRow {
        row(
            index,
            &["binance", "BTCUSDT", "1", ts, "false", "bid", "100.25", "0.5"],
        )
    }

    #[test]
    fn test_valid_row() {
        let mut v = SchemaValidator::new();
        let out = v.validate(&good(0, "100")).unwrap();
        assert_eq!(out.local_timestamp_us, 100);
        assert_eq!(out.side, Side::Bid);
        assert_eq!(out.price.to_string(), "100.25");
        assert_eq!(out.price_text, "100.25");
        assert!(!out.is_snapshot);
        assert_eq!(v.watermark(), Some(100));
    }

    #[test]
    fn test_equal_timestamps_are_monotone() {
        let mut v = SchemaValidator::new();
        v.validate(&good(0, "100")).unwrap();
        v.validate(&good(1, "100")).unwrap();
        v.validate(&good(2, "200")).unwrap();
    }

    #[test]
    fn test_decreasing_timestamp_rejected_without_moving_watermark() {
        let mut v = SchemaValidator::new();
        v.validate(&good(0, "200")).unwrap();
        let err = v.validate(&good(1, "100")).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NonMonotonicTimestamp {
                previous_us: 200,
                current_us: 100,
                ..
            }
        ));
        assert_eq!(v.watermark(), Some(200));
    }

    #[test]
    fn test_watermark_advances_before_field_checks() {
        let mut v = SchemaValidator::new();
        let bad_side = row(
            0,
            &["binance", "BTCUSDT", "1", "300", "false", "up", "1", "1"],
        );
        assert!(v.validate(&bad_side).is_err());
        assert_eq!(v.watermark(), Some(300));
    }

    #[test]
    fn test_field_violations() {
        let cases: [&[&str]; 8] = [
            &["binance", "BTCUSDT", "1", "100", "yes", "bid", "1", "1"],
            &["binance", "BTCUSDT", "1", "100", "false", "buy", "1", "1"],
            &["binance", "BTCUSDT", "1", "100", "false", "bid", "-1", "1"],
            &["binance", "BTCUSDT", "1", "100", "false", "bid", "0", "1"],
            &["binance", "BTCUSDT", "1", "100", "false", "bid", "1", "-0.5"],
            &["binance", "BTCUSDT", "1", "100", "false", "bid", "abc", "1"],
            &["", "BTCUSDT", "1", "100", "false", "bid", "1", "1"],
            &["binance", "BTCUSDT", "x", "100", "false", "bid", "1", "1"],
        ];
        for fields in cases {
            let mut v = SchemaValidator::new();
            let err = v.validate(&row(0, fields)).unwrap_err();
            assert_eq!(err.reason_code(), "schema_violation", "{:?}", fields);
        }
    }

    #[test]
    fn test_zero_amount_is_valid_delete() {
        let mut v = SchemaValidator::new();
        let out = v
            .validate(&row(
                0,
                &["binance", "BTCUSDT", "1", "100", "false", "ask", "1", "0"],
            ))
            .unwrap();
        assert!(out.amount.is_zero());
    }

    #[test]
    fn test_wrong_column_count_and_bad_timestamp() {
        let mut v = SchemaValidator::new();
        assert!(v.check_timestamp(&row(0, &["binance", "BTCUSDT"])).is_err());
        assert!(v
            .check_timestamp(&row(
                0,
                &["binance", "BTCUSDT", "1", "-5", "false", "bid", "1", "1"],
            ))
            .is_err());
        assert_eq!(v.watermark(), None);
    }
}
