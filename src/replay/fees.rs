//! Fee model: a flat taker fee in basis points of notional.

use crate::common::config::MAX_FEE_BPS;
use crate::common::errors::PipelineError;
use crate::common::types::QuoteAtoms;

const BPS_SCALE: i128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedBpsFeeModel {
    bps: i64,
}

impl FixedBpsFeeModel {
    pub fn new(bps: i64) -> Result<Self, PipelineError> {
        if !(0..=MAX_FEE_BPS).contains(&bps) {
            return Err(PipelineError::invalid_config(format!(
                "fee bps must be within 0..={}, got {}",
                MAX_FEE_BPS, bps
            )));
        }
        Ok(Self { bps })
    }

    pub fn bps(&self) -> i64 {
        self.bps
    }

    /// `floor(notional * bps / 10_000)`; `None` for a negative notional.
    pub fn fee(&self, notional: QuoteAtoms) -> Option<QuoteAtoms> {
        if notional < 0 {
            return None;
        }
        let fee = (notional as i128 * self.bps as i128) / BPS_SCALE;
        QuoteAtoms::try_from(fee).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_floors() {
        let model = FixedBpsFeeModel::new(25).unwrap();
        assert_eq!(model.fee(10_000), Some(25));
        assert_eq!(model.fee(399), Some(0));
        assert_eq!(model.fee(401), Some(1));
        assert_eq!(model.fee(-1), None);
    }

    #[test]
    fn test_zero_and_bounds() {
        assert_eq!(FixedBpsFeeModel::default().fee(i64::MAX), Some(0));
        assert_eq!(FixedBpsFeeModel::new(10_000).unwrap().fee(i64::MAX), Some(i64::MAX));
        assert!(FixedBpsFeeModel::new(10_001).is_err());
        assert!(FixedBpsFeeModel::new(-1).is_err());
    }
}
