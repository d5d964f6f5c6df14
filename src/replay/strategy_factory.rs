//! Strategy Factory
//!
//! Maps strategy names to Strategy implementations for the replay runner.
//!
//! # Supported Strategies
//!
//! - `dummy` - Alternates buy/sell with a fixed lot size (param `lots`, default 1)
//! - `random` - Seeded random market orders (params `seed`, `order_pct`,
//!   `min_lots`, `max_lots`)
//! - `noop` - Never trades, used for smoke tests and baselines
//!
//! External strategies implement [`Strategy`] directly and are handed to
//! the engine without going through this registry.

use crate::common::errors::PipelineError;
use crate::common::types::OrderSide;
use crate::replay::book::OrderBook;
use crate::replay::strategy::{OrderIntent, Strategy, StrategyContext, StrategyParams};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Registry of available strategies with their descriptions.
pub fn available_strategies() -> BTreeMap<&'static str, &'static str> {
    let mut map = BTreeMap::new();
    map.insert("dummy", "Alternating buy/sell market orders of a fixed size");
    map.insert("random", "Seeded random market orders");
    map.insert("noop", "No-op strategy that never trades (smoke test)");
    map
}

/// Create a strategy by name (case-insensitive).
pub fn make_strategy(name: &str, params: &StrategyParams) -> Result<Box<dyn Strategy>, PipelineError> {
    let name_lower = name.to_lowercase();

    match name_lower.as_str() {
        "dummy" | "alternating" => Ok(Box::new(DummyStrategy::new(params)?)),
        "random" | "random_taker" | "random-taker" => Ok(Box::new(RandomStrategy::new(params)?)),
        "noop" | "no-op" | "no_op" => Ok(Box::new(NoOpStrategy::new(params))),
        _ => {
            let available: Vec<_> = available_strategies().keys().copied().collect();
            Err(PipelineError::invalid_config(format!(
                "Unknown strategy: '{}'. Available strategies: {}",
                name,
                available.join(", ")
            )))
        }
    }
}

// =============================================================================
// DUMMY STRATEGY
// =============================================================================

/// Sends one market order per batch, starting with a buy and flipping
/// direction on every call. Ignores book content.
pub struct DummyStrategy {
    name: String,
    lots: i64,
    next_side: OrderSide,
}

impl DummyStrategy {
    pub fn new(params: &StrategyParams) -> Result<Self, PipelineError> {
        Ok(Self {
            name: "Dummy".to_string(),
            lots: params.positive("lots", 1)?,
            next_side: OrderSide::Buy,
        })
    }
}

impl Strategy for DummyStrategy {
    fn decide(&mut self, ctx: &StrategyContext, _book: &OrderBook) -> Vec<OrderIntent> {
        let side = self.next_side;
        self.next_side = side.opposite();
        vec![OrderIntent::new(side, self.lots, ctx.batch_id)]
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// RANDOM STRATEGY
// =============================================================================

/// Seeded random market orders.
///
/// The generator for each batch is `ChaCha8` seeded with `seed` on stream
/// `batch_id`, so a decision depends only on the seed and the batch index:
/// the same seed reproduces the same intents, and seeking into the middle
/// of a log yields the same decisions a full replay makes there.
pub struct RandomStrategy {
    name: String,
    seed: u64,
    /// Percent chance (0..=100) of sending an order on a batch.
    order_pct: i64,
    min_lots: i64,
    max_lots: i64,
}

impl RandomStrategy {
    pub fn new(params: &StrategyParams) -> Result<Self, PipelineError> {
        let seed = params.get_or("seed", 0);
        let order_pct = params.get_or("order_pct", 100);
        if !(0..=100).contains(&order_pct) {
            return Err(PipelineError::invalid_config(format!(
                "order_pct must be within 0..=100, got {}",
                order_pct
            )));
        }
        let min_lots = params.positive("min_lots", 1)?;
        let max_lots = params.get_or("max_lots", min_lots);
        if max_lots < min_lots {
            return Err(PipelineError::invalid_config(format!(
                "max_lots ({}) must be >= min_lots ({})",
                max_lots, min_lots
            )));
        }
        Ok(Self {
            name: "Random".to_string(),
            seed: seed as u64,
            order_pct,
            min_lots,
            max_lots,
        })
    }

    fn rng_for(&self, ctx: &StrategyContext) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(ctx.batch_id);
        rng
    }
}

impl Strategy for RandomStrategy {
    fn decide(&mut self, ctx: &StrategyContext, _book: &OrderBook) -> Vec<OrderIntent> {
        let mut rng = self.rng_for(ctx);
        if self.order_pct < 100 && rng.gen_range(0..100) >= self.order_pct {
            return Vec::new();
        }
        let side = if rng.gen_range(0..2) == 0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let lots = rng.gen_range(self.min_lots..=self.max_lots);
        vec![OrderIntent::new(side, lots, ctx.batch_id)]
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// NO-OP STRATEGY
// =============================================================================

/// A strategy that never trades.
///
/// Baseline equity stays at the initial cash plus the marked initial
/// position.
pub struct NoOpStrategy {
    name: String,
    batches_seen: u64,
}

impl NoOpStrategy {
    pub fn new(_params: &StrategyParams) -> Self {
        Self {
            name: "NoOp".to_string(),
            batches_seen: 0,
        }
    }

    pub fn batches_seen(&self) -> u64 {
        self.batches_seen
    }
}

impl Strategy for NoOpStrategy {
    fn decide(&mut self, _ctx: &StrategyContext, _book: &OrderBook) -> Vec<OrderIntent> {
        self.batches_seen += 1;
        Vec::new()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
