//! Portfolio
//!
//! Cash and position in integer units, changed only by fills:
//!
//! ```text
//! buy  lots @ ticks: cash -= ticks*lots + fee, position += lots
//! sell lots @ ticks: cash += ticks*lots - fee, position -= lots
//! ```
//!
//! Marking to market reads the book but never changes cash or position.

use crate::common::config::MarkPolicy;
use crate::common::types::{Lots, OrderSide, QuoteAtoms, Ticks};
use crate::replay::book::OrderBook;
use crate::replay::matching::{Fill, RejectReason};
use serde::{Deserialize, Serialize};

/// Result of marking the portfolio against one book state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub equity: QuoteAtoms,
    /// Price the position was valued at; `None` when nothing was ever marked.
    pub mark_ticks: Option<Ticks>,
    /// `false` when no mark was available and the position counted as zero.
    pub marked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    cash: QuoteAtoms,
    position: Lots,
    total_fees: QuoteAtoms,
    fill_count: u64,
    last_fill_ticks: Option<Ticks>,
    last_mark_ticks: Option<Ticks>,
}

impl Portfolio {
    pub fn new(initial_cash: QuoteAtoms, initial_position: Lots) -> Self {
        Self {
            cash: initial_cash,
            position: initial_position,
            total_fees: 0,
            fill_count: 0,
            last_fill_ticks: None,
            last_mark_ticks: None,
        }
    }

    pub fn cash(&self) -> QuoteAtoms {
        self.cash
    }

    pub fn position(&self) -> Lots {
        self.position
    }

    pub fn total_fees(&self) -> QuoteAtoms {
        self.total_fees
    }

    pub fn fill_count(&self) -> u64 {
        self.fill_count
    }

    pub fn last_fill_ticks(&self) -> Option<Ticks> {
        self.last_fill_ticks
    }

    /// Cash, position and fee totals after `fill`, if they fit in i64.
    fn after_fill(&self, fill: &Fill) -> Option<(QuoteAtoms, Lots, QuoteAtoms)> {
        let (cash, position) = match fill.side {
            OrderSide::Buy => (
                self.cash.checked_sub(fill.notional)?.checked_sub(fill.fee)?,
                self.position.checked_add(fill.lots)?,
            ),
            OrderSide::Sell => (
                self.cash.checked_add(fill.notional)?.checked_sub(fill.fee)?,
                self.position.checked_sub(fill.lots)?,
            ),
        };
        Some((cash, position, self.total_fees.checked_add(fill.fee)?))
    }

    pub fn can_apply(&self, fill: &Fill) -> bool {
        self.after_fill(fill).is_some()
    }

    pub fn apply_fill(&mut self, fill: &Fill) -> Result<(), RejectReason> {
        let (cash, position, total_fees) = self.after_fill(fill).ok_or(RejectReason::NotionalOverflow)?;
        self.cash = cash;
        self.position = position;
        self.total_fees = total_fees;
        self.fill_count += 1;
        self.last_fill_ticks = Some(fill.ticks);
        Ok(())
    }

    /// Value the portfolio against `book`.
    ///
    /// Book price first (mid, or the liquidation side under
    /// `MarkPolicy::Liquidation`), then the last fill price, then the
    /// previous mark. With none of those the position counts as zero and
    /// the valuation is flagged unmarked. Returns `None` if equity does not
    /// fit in i64.
    pub fn mark_to_market(&mut self, book: &OrderBook, policy: MarkPolicy) -> Option<Valuation> {
        let position = self.position as i128;

        let from_book = match policy {
            MarkPolicy::Mid => match (book.best_bid(), book.best_ask()) {
                (Some(bid), Some(ask)) => {
                    let value = (position * (bid.ticks as i128 + ask.ticks as i128)).div_euclid(2);
                    Some((value, (bid.ticks + ask.ticks).div_euclid(2)))
                }
                _ => None,
            },
            MarkPolicy::Liquidation => {
                let level = if self.position > 0 {
                    book.best_bid()
                } else if self.position < 0 {
                    book.best_ask()
                } else {
                    book.best_bid().or_else(|| book.best_ask())
                };
                level.map(|l| (position * l.ticks as i128, l.ticks))
            }
        };

        let (position_value, mark_ticks) = match from_book {
            Some((value, ticks)) => (value, Some(ticks)),
            None => match self.last_fill_ticks.or(self.last_mark_ticks) {
                Some(ticks) => (position * ticks as i128, Some(ticks)),
                None => (0, None),
            },
        };

        let equity = QuoteAtoms::try_from(self.cash as i128 + position_value).ok()?;
        if mark_ticks.is_some() {
            self.last_mark_ticks = mark_ticks;
        }
        Some(Valuation {
            equity,
            mark_ticks,
            marked: mark_ticks.is_some(),
        })
    }
}
