//! Top-of-book market data.

use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Book tick classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// Both sides present and `bid < ask`.
    Valid,
    /// Bid price is zero or missing.
    NoBid,
    /// Ask price is zero or missing.
    NoAsk,
    /// Both sides missing.
    Empty,
    /// `bid >= ask`.
    Crossed,
}

impl BookState {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for BookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NoBid => write!(f, "NO_BID"),
            Self::NoAsk => write!(f, "NO_ASK"),
            Self::Empty => write!(f, "EMPTY"),
            Self::Crossed => write!(f, "CROSSED"),
        }
    }
}

/// Why a tick was refused by [`BookTick::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickRejection {
    Unusable(BookState),
    SpreadTooWide { spread_pct: Decimal },
}

impl std::fmt::Display for TickRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unusable(state) => write!(f, "unusable book: {state}"),
            Self::SpreadTooWide { spread_pct } => {
                write!(f, "spread {}% too wide", spread_pct.round_dp(4))
            }
        }
    }
}

/// Best bid / best ask for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTick {
    pub symbol: String,
    pub bid: Price,
    pub bid_qty: Size,
    pub ask: Price,
    pub ask_qty: Size,
    /// Exchange event time (ms).
    pub event_time_ms: i64,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl BookTick {
    pub fn new(symbol: impl Into<String>, bid: Price, bid_qty: Size, ask: Price, ask_qty: Size) -> Self {
        let received_at = Utc::now();
        Self {
            symbol: symbol.into(),
            bid,
            bid_qty,
            ask,
            ask_qty,
            event_time_ms: received_at.timestamp_millis(),
            received_at,
        }
    }

    /// Synthetic book one tick either side of a reference price.
    pub fn synthetic(symbol: impl Into<String>, price: Price, tick: Price) -> Self {
        let bid = (price - tick).floor_to_tick(tick);
        let ask = (price + tick).ceil_to_tick(tick);
        Self::new(symbol, bid, Size::ZERO, ask, Size::ZERO)
    }

    pub fn mid_price(&self) -> Price {
        Price::midpoint(self.bid, self.ask)
    }

    pub fn spread(&self) -> Price {
        self.ask - self.bid
    }

    /// Spread as a percentage of the bid.
    pub fn spread_pct(&self) -> Option<Decimal> {
        self.ask.pct_from(self.bid)
    }

    pub fn state(&self) -> BookState {
        match (self.bid.is_positive(), self.ask.is_positive()) {
            (false, false) => BookState::Empty,
            (true, false) => BookState::NoAsk,
            (false, true) => BookState::NoBid,
            (true, true) if self.bid < self.ask => BookState::Valid,
            (true, true) => BookState::Crossed,
        }
    }

    /// Sanity check before the tick is allowed into the price cache.
    pub fn validate(&self, max_spread_pct: Decimal) -> Result<(), TickRejection> {
        let state = self.state();
        if !state.is_tradeable() {
            return Err(TickRejection::Unusable(state));
        }
        match self.spread_pct() {
            Some(spread_pct) if spread_pct > max_spread_pct => {
                Err(TickRejection::SpreadTooWide { spread_pct })
            }
            _ => Ok(()),
        }
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.received_at).num_milliseconds()
    }
}
