//! Fill Engine
//!
//! Executes market-order intents against the opposite top-of-book level.
//!
//! - An order fills entirely at the best opposite level or not at all: no
//!   partial fills, no walking deeper levels.
//! - The engine only reads the book. Fills change the portfolio, never the
//!   book; the next batch overwrites levels anyway.
//! - Rejections are ordinary outcomes, not pipeline errors.

use crate::common::types::{BatchId, Lots, Nanos, OrderSide, QuoteAtoms, Ticks};
use crate::replay::book::OrderBook;
use crate::replay::fees::FixedBpsFeeModel;
use crate::replay::portfolio::Portfolio;
use crate::replay::strategy::OrderIntent;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// OUTCOMES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// 1-based, in execution order across the run.
    pub fill_id: u64,
    /// 1-based id of the intent this fill executes.
    pub action_id: u64,
    pub instrument: String,
    pub side: OrderSide,
    pub ticks: Ticks,
    pub lots: Lots,
    pub notional: QuoteAtoms,
    pub fee: QuoteAtoms,
    pub batch_id: BatchId,
    pub ts_recv_ns: Nanos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Top-of-book on the opposite side holds fewer lots than requested
    /// (zero when that side is empty).
    InsufficientLiquidity { requested: Lots, available: Lots },
    /// Buying would take cash below zero while margin is disabled.
    InsufficientCash { required: QuoteAtoms, cash: QuoteAtoms },
    /// Selling more than the held position while shorting is disabled.
    InsufficientPosition { requested: Lots, position: Lots },
    /// Non-positive lot count.
    InvalidQuantity { lots: Lots },
    /// `ticks * lots` or the resulting cash/position does not fit in i64.
    NotionalOverflow,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientLiquidity { .. } => "insufficient_liquidity",
            Self::InsufficientCash { .. } => "insufficient_cash",
            Self::InsufficientPosition { .. } => "insufficient_position",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::NotionalOverflow => "notional_overflow",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientLiquidity { requested, available } => write!(
                f,
                "insufficient liquidity: requested {} lots, top of book holds {}",
                requested, available
            ),
            Self::InsufficientCash { required, cash } => {
                write!(f, "insufficient cash: need {}, have {}", required, cash)
            }
            Self::InsufficientPosition { requested, position } => write!(
                f,
                "insufficient position: selling {} lots, holding {}",
                requested, position
            ),
            Self::InvalidQuantity { lots } => write!(f, "invalid quantity: {} lots", lots),
            Self::NotionalOverflow => write!(f, "notional overflow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub action_id: u64,
    pub side: OrderSide,
    pub lots: Lots,
    pub reason: RejectReason,
    pub batch_id: BatchId,
    pub ts_recv_ns: Nanos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Filled(Fill),
    Rejected(Rejection),
}

impl OrderOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Filled(_))
    }
}

// =============================================================================
// FILL ENGINE
// =============================================================================

#[derive(Debug, Clone)]
pub struct FillEngine {
    fee_model: FixedBpsFeeModel,
    allow_short: bool,
    allow_margin: bool,
    instrument: String,
    next_fill_id: u64,
    next_action_id: u64,
}

impl FillEngine {
    pub fn new(fee_model: FixedBpsFeeModel, instrument: impl Into<String>) -> Self {
        Self {
            fee_model,
            allow_short: true,
            allow_margin: true,
            instrument: instrument.into(),
            next_fill_id: 1,
            next_action_id: 1,
        }
    }

    pub fn with_risk_limits(mut self, allow_short: bool, allow_margin: bool) -> Self {
        self.allow_short = allow_short;
        self.allow_margin = allow_margin;
        self
    }

    pub fn fee_model(&self) -> &FixedBpsFeeModel {
        &self.fee_model
    }

    /// Action id the next call to `execute` will assign.
    pub fn next_action_id(&self) -> u64 {
        self.next_action_id
    }

    /// Evaluate one intent against `book` and the current `portfolio`.
    ///
    /// Neither is mutated; the caller applies a returned fill to the
    /// portfolio. The fill or rejection carries the intent's batch id.
    pub fn execute(
        &mut self,
        intent: &OrderIntent,
        book: &OrderBook,
        portfolio: &Portfolio,
        ts_recv_ns: Nanos,
    ) -> OrderOutcome {
        let batch_id = intent.batch_id;
        let action_id = self.next_action_id;
        self.next_action_id += 1;

        let reject = |reason: RejectReason| {
            OrderOutcome::Rejected(Rejection {
                action_id,
                side: intent.side,
                lots: intent.lots,
                reason,
                batch_id,
                ts_recv_ns,
            })
        };

        if intent.lots <= 0 {
            return reject(RejectReason::InvalidQuantity { lots: intent.lots });
        }

        let Some(level) = book.best(intent.side.liquidity_side()) else {
            return reject(RejectReason::InsufficientLiquidity {
                requested: intent.lots,
                available: 0,
            });
        };
        if level.lots < intent.lots {
            return reject(RejectReason::InsufficientLiquidity {
                requested: intent.lots,
                available: level.lots,
            });
        }

        let Some(notional) = level.ticks.checked_mul(intent.lots) else {
            return reject(RejectReason::NotionalOverflow);
        };
        let Some(fee) = self.fee_model.fee(notional) else {
            return reject(RejectReason::NotionalOverflow);
        };

        match intent.side {
            OrderSide::Buy => {
                let Some(required) = notional.checked_add(fee) else {
                    return reject(RejectReason::NotionalOverflow);
                };
                if !self.allow_margin && portfolio.cash() < required {
                    return reject(RejectReason::InsufficientCash {
                        required,
                        cash: portfolio.cash(),
                    });
                }
            }
            OrderSide::Sell => {
                if !self.allow_short && portfolio.position() < intent.lots {
                    return reject(RejectReason::InsufficientPosition {
                        requested: intent.lots,
                        position: portfolio.position(),
                    });
                }
            }
        }

        let fill = Fill {
            fill_id: self.next_fill_id,
            action_id,
            instrument: self.instrument.clone(),
            side: intent.side,
            ticks: level.ticks,
            lots: intent.lots,
            notional,
            fee,
            batch_id,
            ts_recv_ns,
        };
        if !portfolio.can_apply(&fill) {
            return reject(RejectReason::NotionalOverflow);
        }
        self.next_fill_id += 1;
        OrderOutcome::Filled(fill)
    }
}
