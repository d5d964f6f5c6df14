//! Increment inference.
//!
//! Derives `price_increment` / `amount_increment` as the GCD of the
//! values seen in the first `INFER_MAX_ROWS` rows, after scaling every
//! value to a common number of decimals. Zero amounts (deletes) are
//! skipped. A field with no positive values, or with a single repeated
//! value, cannot be inferred.

use crate::common::errors::{PipelineError, RowRef};
use crate::common::instrument::{parse_decimal, Instrument};
use crate::ingest::csv_source::{Column, CsvRowSource, RawRow};
use rust_decimal::Decimal;
use std::io::Read;
use std::path::Path;
use tracing::info;

pub const INFER_MAX_ROWS: usize = 1000;

#[derive(Debug, Default)]
struct IncrementStats {
    scale: u32,
    gcd: Option<u128>,
    first: Option<u128>,
    has_distinct: bool,
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn pow10(exp: u32) -> Option<u128> {
    10u128.checked_pow(exp)
}

impl IncrementStats {
    fn add(&mut self, value: Decimal, field: &str, row: RowRef, allow_zero: bool) -> Result<(), PipelineError> {
        if value.is_zero() {
            if allow_zero {
                return Ok(());
            }
            return Err(PipelineError::schema_row(row, format!("{} must be positive", field)));
        }
        if value.is_sign_negative() {
            return Err(PipelineError::schema_row(row, format!("{} is negative", field)));
        }

        let overflow = || PipelineError::schema_row(row, format!("{} {} too precise to infer", field, value));
        let value = value.normalize();
        let exp = value.scale();
        if exp > self.scale {
            let factor = pow10(exp - self.scale).ok_or_else(overflow)?;
            if let Some(g) = self.gcd.as_mut() {
                *g = g.checked_mul(factor).ok_or_else(overflow)?;
            }
            if let Some(f) = self.first.as_mut() {
                *f = f.checked_mul(factor).ok_or_else(overflow)?;
            }
            self.scale = exp;
        }
        let mantissa = u128::try_from(value.mantissa()).map_err(|_| overflow())?;
        let scaled = mantissa
            .checked_mul(pow10(self.scale - exp).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;

        match (self.gcd, self.first) {
            (Some(g), Some(first)) => {
                if scaled != first {
                    self.has_distinct = true;
                }
                self.gcd = Some(gcd(g, scaled));
            }
            _ => {
                self.gcd = Some(scaled);
                self.first = Some(scaled);
            }
        }
        Ok(())
    }

    fn finish(&self, field: &str) -> Result<Decimal, PipelineError> {
        let g = self
            .gcd
            .ok_or_else(|| PipelineError::schema_run(format!("{} has no positive values", field)))?;
        if !self.has_distinct {
            return Err(PipelineError::schema_run(format!(
                "{} has no distinct values to infer an increment from",
                field
            )));
        }
        let g = i128::try_from(g)
            .map_err(|_| PipelineError::schema_run(format!("{} increment out of range", field)))?;
        Decimal::try_from_i128_with_scale(g, self.scale)
            .map(|d| d.normalize())
            .map_err(|e| PipelineError::schema_run(format!("{} increment out of range: {}", field, e)))
    }
}

fn field_value(row: &RawRow, column: Column) -> Result<Decimal, PipelineError> {
    let text = row.field(column).unwrap_or("");
    parse_decimal(text).ok_or_else(|| {
        PipelineError::schema_row(
            row.row_ref(),
            format!("{} is not a decimal: {:?}", column.name(), text),
        )
    })
}

/// Infer increments from any CSV reader.
pub fn infer_increments_from_reader<R: Read>(inner: R) -> Result<Instrument, PipelineError> {
    let source = CsvRowSource::from_reader(inner)?;
    let mut price = IncrementStats::default();
    let mut amount = IncrementStats::default();
    let mut seen = 0usize;
    for row in source.take(INFER_MAX_ROWS) {
        let row = row?;
        price.add(field_value(&row, Column::Price)?, "price", row.row_ref(), false)?;
        amount.add(field_value(&row, Column::Amount)?, "amount", row.row_ref(), true)?;
        seen += 1;
    }
    let instrument = Instrument::new(price.finish("price")?, amount.finish("amount")?)?;
    info!(
        rows = seen,
        price_increment = %instrument.price_increment(),
        amount_increment = %instrument.amount_increment(),
        "inferred increments"
    );
    Ok(instrument)
}

pub fn infer_increments(path: &Path) -> Result<Instrument, PipelineError> {
    let file = std::fs::File::open(path)
        .map_err(|e| PipelineError::io(format!("open input {}", path.display()), e))?;
    infer_increments_from_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "exchange,symbol,timestamp,local_timestamp,is_snapshot,side,price,amount\n";

    fn csv(rows: &[(&str, &str)]) -> String {
        let mut out = HEADER.to_string();
        for (i, (price, amount)) in rows.iter().enumerate() {
            out.push_str(&format!(
                "binance,BTCUSDT,{i},{i},false,bid,{price},{amount}\n"
            ));
        }
        out
    }

    #[test]
    fn test_infers_gcd_across_scales() {
        let data = csv(&[("100.5", "1"), ("100.25", "0.5"), ("101", "0"), ("99.75", "1.5")]);
        let inst = infer_increments_from_reader(data.as_bytes()).unwrap();
        assert_eq!(inst.price_increment().to_string(), "0.25");
        assert_eq!(inst.amount_increment().to_string(), "0.5");
    }

    #[test]
    fn test_requires_distinct_values() {
        let data = csv(&[("100", "1"), ("100", "2")]);
        let err = infer_increments_from_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn test_requires_positive_amounts() {
        let data = csv(&[("100", "0"), ("101", "0")]);
        let err = infer_increments_from_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn test_rejects_zero_price() {
        let data = csv(&[("0", "1"), ("101", "2")]);
        assert!(infer_increments_from_reader(data.as_bytes()).is_err());
    }
}
