//! Core Domain Types
//!
//! Integer units shared by the compiler and the replay engine. All prices,
//! sizes and cash amounts are fixed-point integers; floats never enter the
//! accounting path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
/// Receive time only; exchange time is informational and never ordered on.
pub type Nanos = i64;

/// Conversion constants
pub const NANOS_PER_MICRO: i64 = 1_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Integer price expressed as multiples of `price_increment`.
pub type Ticks = i64;

/// Integer size expressed as multiples of `amount_increment`.
pub type Lots = i64;

/// Integer notional, `ticks * lots`, used for cash and fee accounting.
pub type QuoteAtoms = i64;

/// Ordinal of a batch (0-based).
pub type BatchId = u64;

/// Book side of a price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Side {
    Bid = 0,
    Ask = 1,
}

impl Side {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Wire encoding used by the event log.
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Side::Bid),
            1 => Some(Side::Ask),
            _ => None,
        }
    }

    /// Parse the textual side used by CSV exports (`bid` / `ask`).
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("bid") {
            Some(Side::Bid)
        } else if value.eq_ignore_ascii_case("ask") {
            Some(Side::Ask)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// The book side a market order of this direction takes liquidity from.
    #[inline]
    pub fn liquidity_side(&self) -> Side {
        match self {
            OrderSide::Buy => Side::Ask,
            OrderSide::Sell => Side::Bid,
        }
    }

    /// Signed position change per lot.
    #[inline]
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
