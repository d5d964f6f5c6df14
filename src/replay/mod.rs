//! Deterministic Replay
//!
//! ```text
//! EventLogReader ─► OrderBook ─► Strategy ─► FillEngine ─► Portfolio ─► EquityCurve
//! ```
//!
//! - `OrderBook` is owned and mutated by the engine only; strategies and the
//!   fill engine get shared references.
//! - Market orders fill at the opposite top-of-book level in full or not at
//!   all (`InsufficientLiquidity`).
//! - All money is integer QuoteAtoms (`ticks * lots`); fees are floored.
//! - Randomness comes from seeded `ChaCha8Rng` streams keyed by batch id.

pub mod book;
pub mod engine;
pub mod equity_curve;
pub mod fees;
pub mod matching;
pub mod portfolio;
pub mod strategy;
pub mod strategy_factory;
pub mod tape;


pub use book::{BatchApplyResult, Level, OrderBook};
pub use engine::{replay_artifact, ReplayEngine, ReplayResult, StepOutcome};
pub use equity_curve::{EquityCurve, EquityPoint};
pub use fees::FixedBpsFeeModel;
pub use matching::{Fill, FillEngine, OrderOutcome, RejectReason, Rejection};
pub use portfolio::{Portfolio, Valuation};
pub use strategy::{OrderIntent, Strategy, StrategyContext, StrategyParams};
pub use strategy_factory::{available_strategies, make_strategy, DummyStrategy, NoOpStrategy, RandomStrategy};
pub use tape::{read_tape, TapeHeader, TapeRecord, TapeWriter};
