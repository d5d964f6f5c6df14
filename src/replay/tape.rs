//! Replay tape: one JSON record per line.
//!
//! ```text
//! {"type":"header", ...run metadata}
//! {"type":"action","ts_recv_ns":..,"action_id":1,"side":"buy","lots":1}
//! {"type":"fill", ...}
//! {"type":"reject", ...}
//! {"type":"equity","ts_recv_ns":..,"cash":..,"position":..,"equity":..}
//! ```
//!
//! Records appear in execution order. The tape holds no wall-clock data, so
//! identical runs produce identical tapes.

use crate::common::errors::PipelineError;
use crate::common::types::{BatchId, Lots, Nanos, OrderSide, QuoteAtoms, Ticks};
use crate::replay::equity_curve::EquityPoint;
use crate::replay::matching::{Fill, RejectReason, Rejection};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeHeader {
    pub strategy: String,
    pub exchange: String,
    pub symbol: String,
    pub date: String,
    pub artifact_output_hash: String,
    pub fee_bps: i64,
    pub initial_cash: QuoteAtoms,
    pub initial_position: Lots,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TapeRecord {
    Header(TapeHeader),
    Action {
        ts_recv_ns: Nanos,
        batch_id: BatchId,
        action_id: u64,
        side: OrderSide,
        lots: Lots,
    },
    Fill {
        ts_recv_ns: Nanos,
        batch_id: BatchId,
        fill_id: u64,
        action_id: u64,
        side: OrderSide,
        ticks: Ticks,
        lots: Lots,
        notional: QuoteAtoms,
        fee: QuoteAtoms,
    },
    Reject {
        ts_recv_ns: Nanos,
        batch_id: BatchId,
        action_id: u64,
        side: OrderSide,
        lots: Lots,
        reason: RejectReason,
    },
    Equity {
        ts_recv_ns: Nanos,
        batch_id: BatchId,
        cash: QuoteAtoms,
        position: Lots,
        equity: QuoteAtoms,
        marked: bool,
    },
}

impl From<&Fill> for TapeRecord {
    fn from(fill: &Fill) -> Self {
        TapeRecord::Fill {
            ts_recv_ns: fill.ts_recv_ns,
            batch_id: fill.batch_id,
            fill_id: fill.fill_id,
            action_id: fill.action_id,
            side: fill.side,
            ticks: fill.ticks,
            lots: fill.lots,
            notional: fill.notional,
            fee: fill.fee,
        }
    }
}

impl From<&Rejection> for TapeRecord {
    fn from(r: &Rejection) -> Self {
        TapeRecord::Reject {
            ts_recv_ns: r.ts_recv_ns,
            batch_id: r.batch_id,
            action_id: r.action_id,
            side: r.side,
            lots: r.lots,
            reason: r.reason,
        }
    }
}

impl From<&EquityPoint> for TapeRecord {
    fn from(p: &EquityPoint) -> Self {
        TapeRecord::Equity {
            ts_recv_ns: p.ts_recv_ns,
            batch_id: p.batch_id,
            cash: p.cash,
            position: p.position,
            equity: p.equity,
            marked: p.marked,
        }
    }
}

pub struct TapeWriter {
    out: Box<dyn Write>,
    records: u64,
}

impl TapeWriter {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self { out, records: 0 }
    }

    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        let file = File::create(path)
            .map_err(|e| PipelineError::io(format!("create tape {}", path.display()), e))?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn write(&mut self, record: &TapeRecord) -> Result<(), PipelineError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| PipelineError::schema_run(format!("serialize tape record: {}", e)))?;
        line.push(b'\n');
        self.out
            .write_all(&line)
            .map_err(|e| PipelineError::io("write tape record", e))?;
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), PipelineError> {
        self.out.flush().map_err(|e| PipelineError::io("flush tape", e))
    }
}

/// Parse a tape written by [`TapeWriter`].
pub fn read_tape(text: &str) -> Result<Vec<TapeRecord>, PipelineError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| PipelineError::decode(i as u64, format!("tape record: {}", e)))
        })
        .collect()
}
