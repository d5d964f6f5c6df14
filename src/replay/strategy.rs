//! Strategy Interface
//!
//! A strategy sees the reconstructed book once per applied batch and
//! returns the market orders it wants to send, in order. Strategies never
//! touch the book or the portfolio; they get a read-only context and are
//! told about fills and rejections afterwards.
//!
//! Randomness must come from an explicit seeded generator owned by the
//! strategy, never from wall-clock time or a global RNG.

use crate::common::errors::PipelineError;
use crate::common::types::{BatchId, Lots, Nanos, OrderSide, QuoteAtoms};
use crate::replay::book::OrderBook;
use crate::replay::matching::{Fill, Rejection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A market order the strategy wants executed against the current book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub lots: Lots,
    /// Batch whose book the intent was decided on.
    pub batch_id: BatchId,
}

impl OrderIntent {
    pub fn new(side: OrderSide, lots: Lots, batch_id: BatchId) -> Self {
        Self { side, lots, batch_id }
    }

    /// Buy intent not yet tied to a batch (`batch_id` 0).
    pub fn buy(lots: Lots) -> Self {
        Self::new(OrderSide::Buy, lots, 0)
    }

    /// Sell intent not yet tied to a batch (`batch_id` 0).
    pub fn sell(lots: Lots) -> Self {
        Self::new(OrderSide::Sell, lots, 0)
    }

    pub fn for_batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = batch_id;
        self
    }
}

/// Read-only view handed to `decide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyContext {
    pub batch_id: BatchId,
    pub ts_recv_ns: Nanos,
    pub cash: QuoteAtoms,
    pub position: Lots,
}

impl StrategyContext {
    /// Buy intent originating from this batch.
    pub fn buy(&self, lots: Lots) -> OrderIntent {
        OrderIntent::new(OrderSide::Buy, lots, self.batch_id)
    }

    /// Sell intent originating from this batch.
    pub fn sell(&self, lots: Lots) -> OrderIntent {
        OrderIntent::new(OrderSide::Sell, lots, self.batch_id)
    }
}

/// Strategy parameters (loaded from config).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyParams {
    pub params: BTreeMap<String, i64>,
}

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.params.get(key).copied()
    }

    pub fn get_or(&self, key: &str, default: i64) -> i64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    /// `get_or` that additionally requires `value > 0`.
    pub fn positive(&self, key: &str, default: i64) -> Result<i64, PipelineError> {
        let value = self.get_or(key, default);
        if value <= 0 {
            return Err(PipelineError::invalid_config(format!(
                "strategy param {} must be positive, got {}",
                key, value
            )));
        }
        Ok(value)
    }
}

impl From<&BTreeMap<String, i64>> for StrategyParams {
    fn from(params: &BTreeMap<String, i64>) -> Self {
        Self {
            params: params.clone(),
        }
    }
}

/// Any decision logic the replay engine can drive.
pub trait Strategy: Send {
    /// Called once per applied batch, after the book reflects it.
    fn decide(&mut self, ctx: &StrategyContext, book: &OrderBook) -> Vec<OrderIntent>;

    /// Called after one of this batch's intents filled.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// Called after one of this batch's intents was rejected.
    fn on_reject(&mut self, _rejection: &Rejection) {}

    /// Strategy name for logging.
    fn name(&self) -> &str;
}
