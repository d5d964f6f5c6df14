//! Quantizer: exact decimal → integer ticks/lots.
//!
//! A value that is not an exact multiple of its increment fails with
//! `QuantizationIndivisible`; nothing is ever rounded or truncated.

use crate::common::errors::{PipelineError, RowRef};
use crate::common::instrument::Instrument;
use crate::common::types::{Lots, Ticks};
use crate::evlog::format::LevelUpdate;
use crate::ingest::validation::ValidatedRow;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantizer {
    instrument: Instrument,
}

impl Quantizer {
    pub fn new(instrument: Instrument) -> Self {
        Self { instrument }
    }

    pub fn from_strings(price_increment: &str, amount_increment: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(Instrument::from_strings(price_increment, amount_increment)?))
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn price_to_ticks(&self, price: Decimal, row: Option<RowRef>) -> Result<Ticks, PipelineError> {
        quantize(price, self.instrument.price_increment(), "price", row)
    }

    pub fn amount_to_lots(&self, amount: Decimal, row: Option<RowRef>) -> Result<Lots, PipelineError> {
        quantize(amount, self.instrument.amount_increment(), "amount", row)
    }

    pub fn quantize_row(&self, row: &ValidatedRow) -> Result<LevelUpdate, PipelineError> {
        let ticks = self.price_to_ticks(row.price, Some(row.row))?;
        let lots = self.amount_to_lots(row.amount, Some(row.row))?;
        Ok(LevelUpdate::new(row.side, ticks, lots))
    }
}

fn quantize(
    value: Decimal,
    increment: Decimal,
    field: &'static str,
    row: Option<RowRef>,
) -> Result<i64, PipelineError> {
    let indivisible = || PipelineError::QuantizationIndivisible {
        row,
        field,
        value: value.normalize().to_string(),
        increment: increment.to_string(),
    };
    let out_of_range = || {
        let detail = format!("{} {} is out of range for increment {}", field, value, increment);
        match row {
            Some(row) => PipelineError::schema_row(row, detail),
            None => PipelineError::schema_run(detail),
        }
    };

    let quotient = value.checked_div(increment).ok_or_else(out_of_range)?;
    if !quotient.fract().is_zero() {
        return Err(indivisible());
    }
    let units = quotient.to_i64().ok_or_else(out_of_range)?;

    // Division may round in the last digit for extreme precisions; the
    // product check is what guarantees exactness.
    match Decimal::from(units).checked_mul(increment) {
        Some(back) if back == value => Ok(units),
        Some(_) => Err(indivisible()),
        None => Err(out_of_range()),
    }
}
