//! Order Book Reconstructor
//!
//! Rebuilds L2 book state by applying event-log batches in order.
//! A snapshot-reset batch clears both sides first; each update then either
//! overwrites a level's lots or, for `lots == 0`, removes the level.
//!
//! The crossing check runs once per batch, after every update of the batch
//! has been applied. A crossed book is reported, never repaired: the caller
//! decides (through the failure policy) whether to abort or to revert the
//! batch with [`OrderBook::revert_last_batch`].

use crate::common::errors::PipelineError;
use crate::common::types::{BatchId, Lots, Nanos, Side, Ticks};
use crate::evlog::format::Batch;
use std::collections::BTreeMap;

// =============================================================================
// LEVEL KEYS
// =============================================================================

/// Price key for BTreeMap ordering.
/// Bids: higher ticks = better (reverse order)
/// Asks: lower ticks = better (natural order)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderedTicks {
    ticks: Ticks,
    is_bid: bool,
}

impl OrderedTicks {
    fn new(side: Side, ticks: Ticks) -> Self {
        Self {
            ticks,
            is_bid: side == Side::Bid,
        }
    }
}

impl PartialOrd for OrderedTicks {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedTicks {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.is_bid {
            other.ticks.cmp(&self.ticks)
        } else {
            self.ticks.cmp(&other.ticks)
        }
    }
}

/// A resting price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub ticks: Ticks,
    pub lots: Lots,
}

impl Level {
    pub fn new(ticks: Ticks, lots: Lots) -> Self {
        Self { ticks, lots }
    }
}

/// Level counters from one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchApplyResult {
    pub levels_added: u32,
    pub levels_updated: u32,
    pub levels_removed: u32,
    /// Both sides were cleared before the updates were applied.
    pub was_reset: bool,
}

/// Enough state to undo the most recent batch.
#[derive(Debug, Clone)]
enum UndoJournal {
    /// Previous sides, captured before a snapshot reset.
    Reset {
        bids: BTreeMap<OrderedTicks, Lots>,
        asks: BTreeMap<OrderedTicks, Lots>,
    },
    /// Prior lots of every touched level, in application order.
    Levels(Vec<(OrderedTicks, Option<Lots>)>),
}

// =============================================================================
// ORDER BOOK
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bids sorted best (highest) first
    bids: BTreeMap<OrderedTicks, Lots>,
    /// Asks sorted best (lowest) first
    asks: BTreeMap<OrderedTicks, Lots>,
    /// Receive time of the last applied batch
    pub last_update: Nanos,
    /// Number of batches applied (reverted batches excluded)
    pub update_count: u64,
    /// Journal of the last batch plus the `last_update` it replaced
    undo: Option<(UndoJournal, Nanos)>,
}

impl OrderBook {
    /// Create an empty order book.
    pub fn new() -> Self {
        Self::default()
    }

    fn side_mut(&mut self, is_bid: bool) -> &mut BTreeMap<OrderedTicks, Lots> {
        if is_bid {
            &mut self.bids
        } else {
            &mut self.asks
        }
    }

    fn side(&self, side: Side) -> &BTreeMap<OrderedTicks, Lots> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Apply one batch atomically.
    ///
    /// The batch is always applied in full. If the resulting book is
    /// crossed, `CrossedBookDetected` is returned and the crossed state is
    /// left in place for the caller to inspect or revert.
    pub fn apply_batch(&mut self, batch_id: BatchId, batch: &Batch) -> Result<BatchApplyResult, PipelineError> {
        let mut result = BatchApplyResult::default();

        let mut journal = if batch.is_snapshot_reset {
            result.was_reset = true;
            UndoJournal::Reset {
                bids: std::mem::take(&mut self.bids),
                asks: std::mem::take(&mut self.asks),
            }
        } else {
            UndoJournal::Levels(Vec::with_capacity(batch.updates.len()))
        };

        for update in &batch.updates {
            let key = OrderedTicks::new(update.side, update.ticks);
            let side = self.side_mut(key.is_bid);
            let previous = if update.is_delete() {
                let previous = side.remove(&key);
                if previous.is_some() {
                    result.levels_removed += 1;
                }
                previous
            } else {
                let previous = side.insert(key, update.lots);
                if previous.is_some() {
                    result.levels_updated += 1;
                } else {
                    result.levels_added += 1;
                }
                previous
            };
            if let UndoJournal::Levels(levels) = &mut journal {
                levels.push((key, previous));
            }
        }

        self.undo = Some((journal, self.last_update));
        self.last_update = batch.ts_recv_ns;
        self.update_count += 1;

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid.ticks >= ask.ticks {
                return Err(PipelineError::CrossedBookDetected {
                    batch_id,
                    ts_recv_ns: batch.ts_recv_ns,
                    best_bid: bid.ticks,
                    best_ask: ask.ticks,
                });
            }
        }
        Ok(result)
    }

    /// Restore the state from before the last applied batch.
    ///
    /// Returns `false` when there is nothing to undo. Only one batch can be
    /// reverted; the journal is consumed.
    pub fn revert_last_batch(&mut self) -> bool {
        let Some((journal, last_update)) = self.undo.take() else {
            return false;
        };
        match journal {
            UndoJournal::Reset { bids, asks } => {
                self.bids = bids;
                self.asks = asks;
            }
            UndoJournal::Levels(levels) => {
                for (key, previous) in levels.into_iter().rev() {
                    let side = self.side_mut(key.is_bid);
                    match previous {
                        Some(lots) => {
                            side.insert(key, lots);
                        }
                        None => {
                            side.remove(&key);
                        }
                    }
                }
            }
        }
        self.last_update = last_update;
        self.update_count = self.update_count.saturating_sub(1);
        true
    }

    /// Remove every level on both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.undo = None;
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn best_bid(&self) -> Option<Level> {
        self.bids.iter().next().map(|(k, &lots)| Level::new(k.ticks, lots))
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.iter().next().map(|(k, &lots)| Level::new(k.ticks, lots))
    }

    /// Top-of-book on `side`.
    pub fn best(&self, side: Side) -> Option<Level> {
        match side {
            Side::Bid => self.best_bid(),
            Side::Ask => self.best_ask(),
        }
    }

    /// Lots resting at exactly `ticks` on `side`.
    pub fn level(&self, side: Side, ticks: Ticks) -> Option<Lots> {
        self.side(side).get(&OrderedTicks::new(side, ticks)).copied()
    }

    pub fn is_crossed(&self) -> bool {
        matches!(
            (self.best_bid(), self.best_ask()),
            (Some(bid), Some(ask)) if bid.ticks >= ask.ticks
        )
    }

    /// `best_ask - best_bid` in ticks.
    pub fn spread(&self) -> Option<Ticks> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.ticks - bid.ticks),
            _ => None,
        }
    }

    /// Floored mid in ticks.
    pub fn mid_floor(&self) -> Option<Ticks> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.ticks + ask.ticks).div_euclid(2)),
            _ => None,
        }
    }

    /// Get top N bid levels, best first.
    pub fn top_bids(&self, n: usize) -> Vec<Level> {
        self.bids
            .iter()
            .take(n)
            .map(|(k, &lots)| Level::new(k.ticks, lots))
            .collect()
    }

    /// Get top N ask levels, best first.
    pub fn top_asks(&self, n: usize) -> Vec<Level> {
        self.asks
            .iter()
            .take(n)
            .map(|(k, &lots)| Level::new(k.ticks, lots))
            .collect()
    }

    /// Number of price levels on (bid, ask).
    pub fn depth(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evlog::format::LevelUpdate;

    fn batch(ts: Nanos, reset: bool, updates: &[(Side, Ticks, Lots)]) -> Batch {
        Batch::new(
            ts,
            reset,
            updates
                .iter()
                .map(|&(side, ticks, lots)| LevelUpdate::new(side, ticks, lots))
                .collect(),
        )
    }

    #[test]
    fn test_overwrite_and_remove() {
        let mut book = OrderBook::new();
        let r = book
            .apply_batch(0, &batch(1, false, &[(Side::Bid, 100, 5), (Side::Ask, 101, 3)]))
            .unwrap();
        assert_eq!(r.levels_added, 2);

        let r = book
            .apply_batch(1, &batch(2, false, &[(Side::Bid, 100, 7), (Side::Ask, 101, 0)]))
            .unwrap();
        assert_eq!(r.levels_updated, 1);
        assert_eq!(r.levels_removed, 1);
        assert_eq!(book.level(Side::Bid, 100), Some(7));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_ordering() {
        let mut book = OrderBook::new();
        book.apply_batch(
            0,
            &batch(
                1,
                false,
                &[
                    (Side::Bid, 98, 1),
                    (Side::Bid, 100, 2),
                    (Side::Bid, 99, 3),
                    (Side::Ask, 103, 1),
                    (Side::Ask, 101, 2),
                ],
            ),
        )
        .unwrap();
        assert_eq!(book.best_bid(), Some(Level::new(100, 2)));
        assert_eq!(book.best_ask(), Some(Level::new(101, 2)));
        assert_eq!(
            book.top_bids(2),
            vec![Level::new(100, 2), Level::new(99, 3)]
        );
        assert_eq!(book.spread(), Some(1));
        assert_eq!(book.mid_floor(), Some(100));
        assert_eq!(book.depth(), (3, 2));
    }

    #[test]
    fn test_delete_of_missing_level_is_noop() {
        let mut book = OrderBook::new();
        let r = book.apply_batch(0, &batch(1, false, &[(Side::Ask, 50, 0)])).unwrap();
        assert_eq!(r, BatchApplyResult::default());
        assert!(book.is_empty());
    }

    #[test]
    fn test_revert_restores_levels() {
        let mut book = OrderBook::new();
        book.apply_batch(0, &batch(1, false, &[(Side::Bid, 100, 5), (Side::Ask, 102, 3)]))
            .unwrap();
        book.apply_batch(
            1,
            &batch(2, false, &[(Side::Bid, 100, 0), (Side::Bid, 99, 4), (Side::Bid, 99, 6)]),
        )
        .unwrap();
        assert!(book.revert_last_batch());
        assert_eq!(book.top_bids(5), vec![Level::new(100, 5)]);
        assert_eq!(book.update_count, 1);
        assert!(!book.revert_last_batch());
    }

    #[test]
    fn test_revert_after_reset() {
        let mut book = OrderBook::new();
        book.apply_batch(0, &batch(1, false, &[(Side::Bid, 100, 5)])).unwrap();
        book.apply_batch(1, &batch(2, true, &[(Side::Ask, 120, 1)])).unwrap();
        assert_eq!(book.best_bid(), None);
        assert!(book.revert_last_batch());
        assert_eq!(book.best_bid(), Some(Level::new(100, 5)));
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_revert_restores_last_update() {
        let mut book = OrderBook::new();
        book.apply_batch(0, &batch(1, false, &[(Side::Bid, 100, 5), (Side::Ask, 101, 5)]))
            .unwrap();
        assert!(book.apply_batch(1, &batch(2, false, &[(Side::Bid, 101, 1)])).is_err());
        assert_eq!(book.last_update, 2);
        assert!(book.revert_last_batch());
        assert_eq!(book.last_update, 1);
        assert!(!book.is_crossed());
    }
}
