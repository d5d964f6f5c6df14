//! Time-Indexed Equity Curve
//!
//! One point per applied batch, append-only, strictly increasing by
//! `ts_recv_ns`. All values are integer QuoteAtoms.
//!
//! ```text
//! Equity = Cash + MarkedPositionValue
//! ```
//!
//! The curve keeps a running SHA-256 over every point so two runs can be
//! compared by digest alone.

use crate::common::errors::PipelineError;
use crate::common::types::{BatchId, Lots, Nanos, QuoteAtoms, Ticks};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const BPS_SCALE: i128 = 10_000;

// =============================================================================
// EQUITY POINT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts_recv_ns: Nanos,
    pub batch_id: BatchId,
    pub equity: QuoteAtoms,
    pub cash: QuoteAtoms,
    pub position: Lots,
    pub mark_ticks: Option<Ticks>,
    pub marked: bool,
    /// Peak equity so far minus this point's equity.
    pub drawdown: QuoteAtoms,
}

impl EquityPoint {
    fn digest_bytes(&self) -> [u8; 8 * 6 + 1] {
        let mut out = [0u8; 8 * 6 + 1];
        out[0..8].copy_from_slice(&self.ts_recv_ns.to_le_bytes());
        out[8..16].copy_from_slice(&self.batch_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.equity.to_le_bytes());
        out[24..32].copy_from_slice(&self.cash.to_le_bytes());
        out[32..40].copy_from_slice(&self.position.to_le_bytes());
        out[40..48].copy_from_slice(&self.mark_ticks.unwrap_or(0).to_le_bytes());
        out[48] = self.marked as u8;
        out
    }
}

// =============================================================================
// EQUITY CURVE
// =============================================================================

/// Invariant: points are strictly increasing by `ts_recv_ns`.
#[derive(Debug, Clone)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
    peak_equity: Option<QuoteAtoms>,
    hasher: Sha256,
}

impl Default for EquityCurve {
    fn default() -> Self {
        Self::new()
    }
}

impl EquityCurve {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            peak_equity: None,
            hasher: Sha256::new(),
        }
    }

    /// Append a point; `drawdown` is computed here.
    pub fn record(
        &mut self,
        ts_recv_ns: Nanos,
        batch_id: BatchId,
        equity: QuoteAtoms,
        cash: QuoteAtoms,
        position: Lots,
        mark_ticks: Option<Ticks>,
    ) -> Result<&EquityPoint, PipelineError> {
        if let Some(last) = self.points.last() {
            if ts_recv_ns <= last.ts_recv_ns {
                return Err(PipelineError::schema_run(format!(
                    "equity point at {} ns is not after {} ns",
                    ts_recv_ns, last.ts_recv_ns
                )));
            }
        }

        let peak = self.peak_equity.map_or(equity, |p| p.max(equity));
        self.peak_equity = Some(peak);

        let point = EquityPoint {
            ts_recv_ns,
            batch_id,
            equity,
            cash,
            position,
            mark_ticks,
            marked: mark_ticks.is_some(),
            drawdown: peak.saturating_sub(equity),
        };
        self.hasher.update(point.digest_bytes());
        self.points.push(point);
        Ok(&self.points[self.points.len() - 1])
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }

    pub fn final_equity(&self) -> Option<QuoteAtoms> {
        self.last().map(|p| p.equity)
    }

    pub fn peak_equity(&self) -> Option<QuoteAtoms> {
        self.peak_equity
    }

    pub fn max_drawdown(&self) -> QuoteAtoms {
        self.points.iter().map(|p| p.drawdown).max().unwrap_or(0)
    }

    /// Lowercase hex SHA-256 over every recorded point.
    pub fn digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Per-step equity changes in basis points of `initial_cash`,
    /// rounded half to even.
    pub fn returns_bps(&self, initial_cash: QuoteAtoms) -> Result<Vec<i64>, PipelineError> {
        if initial_cash <= 0 {
            return Err(PipelineError::invalid_config("initial_cash must be positive for returns"));
        }
        if self.points.len() < 2 {
            return Err(PipelineError::schema_run("returns need at least two equity points"));
        }
        self.points
            .windows(2)
            .map(|w| {
                let delta = w[1].equity as i128 - w[0].equity as i128;
                let bps = round_half_even(delta * BPS_SCALE, initial_cash as i128);
                i64::try_from(bps)
                    .map_err(|_| PipelineError::schema_run(format!("return of {} bps overflows i64", bps)))
            })
            .collect()
    }
}

/// `numer / denom` rounded half to even; `denom` must be positive.
fn round_half_even(numer: i128, denom: i128) -> i128 {
    let sign = if numer < 0 { -1 } else { 1 };
    let numer = numer.abs();
    let mut q = numer / denom;
    let twice_r = (numer % denom) * 2;
    if twice_r > denom || (twice_r == denom && q % 2 == 1) {
        q += 1;
    }
    sign * q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tracks_peak_and_drawdown() {
        let mut curve = EquityCurve::new();
        curve.record(1, 0, 100, 100, 0, None).unwrap();
        curve.record(2, 1, 120, 20, 1, Some(100)).unwrap();
        let p = curve.record(3, 2, 90, 20, 1, Some(70)).unwrap();
        assert_eq!(p.drawdown, 30);
        assert!(p.marked);
        assert_eq!(curve.peak_equity(), Some(120));
        assert_eq!(curve.max_drawdown(), 30);
        assert_eq!(curve.final_equity(), Some(90));
    }

    #[test]
    fn test_negative_first_equity_has_zero_drawdown() {
        let mut curve = EquityCurve::new();
        assert_eq!(curve.record(1, 0, -50, -50, 0, None).unwrap().drawdown, 0);
    }

    #[test]
    fn test_time_must_increase() {
        let mut curve = EquityCurve::new();
        curve.record(5, 0, 0, 0, 0, None).unwrap();
        assert!(curve.record(5, 1, 0, 0, 0, None).is_err());
        assert_eq!(curve.len(), 1);
    }

    #[test]
    fn test_digest_depends_on_points() {
        let mut a = EquityCurve::new();
        let mut b = EquityCurve::new();
        assert_eq!(a.digest(), b.digest());
        a.record(1, 0, 10, 10, 0, None).unwrap();
        b.record(1, 0, 10, 10, 0, None).unwrap();
        assert_eq!(a.digest(), b.digest());
        a.record(2, 1, 11, 11, 0, None).unwrap();
        b.record(2, 1, 12, 12, 0, None).unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_returns_round_half_even() {
        let mut curve = EquityCurve::new();
        for (ts, equity) in [(1, 20_000), (2, 20_001), (3, 20_004), (4, 20_000)] {
            curve.record(ts, ts as u64, equity, equity, 0, None).unwrap();
        }
        // 1 * 10_000 / 20_000 = 0.5 -> 0; 3 -> 1.5 -> 2; -4 -> -2
        assert_eq!(curve.returns_bps(20_000).unwrap(), vec![0, 2, -2]);
        assert!(curve.returns_bps(0).is_err());
        assert!(EquityCurve::new().returns_bps(1).is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(5, 2), 2);
        assert_eq!(round_half_even(7, 2), 4);
        assert_eq!(round_half_even(-5, 2), -2);
        assert_eq!(round_half_even(-7, 2), -4);
        assert_eq!(round_half_even(10, 3), 3);
    }
}
