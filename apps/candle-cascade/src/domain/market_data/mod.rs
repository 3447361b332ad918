//! Market Data Types
//!
//! Core domain types for the aggregation pipeline: raw ticks as received
//! from the venue adapter, and OHLC bars as produced by tier refreshes.
//!
//! # Design
//!
//! - Prices are `rust_decimal::Decimal`, never floats.
//! - `spread` and `mid` are derived accessors, not stored fields.
//! - Bars are pure folds over their inputs: a bar can always be recomputed
//!   from scratch, so refresh replaces bars wholesale instead of mutating
//!   them in place.
//! - The price basis for tier-1 bars is the tick **bid**, matching the
//!   upstream candle views this service replaces.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// A canonical instrument symbol (e.g. `BTCUSD`, `EURUSD`).
pub type Symbol = String;

/// A single top-of-book price observation.
///
/// `(symbol, time)` is unique in the raw store; a colliding write replaces
/// the prior value (last write wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Canonical symbol this tick belongs to.
    pub symbol: Symbol,
    /// Observation time (microsecond precision).
    pub time: DateTime<Utc>,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub const fn new(symbol: Symbol, time: DateTime<Utc>, bid: Decimal, ask: Decimal) -> Self {
        Self {
            symbol,
            time,
            bid,
            ask,
        }
    }

    /// Bid/ask spread (`ask - bid`).
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Mid price (`(bid + ask) / 2`).
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// One OHLC bucket of aggregated price data.
///
/// The schema is identical across tiers; `time` is the bucket start and
/// `tick_count` carries the number of raw ticks the bar ultimately
/// summarizes (counted at tier 1, summed upward).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bucket start time.
    pub time: DateTime<Utc>,
    /// Canonical symbol this bar belongs to.
    pub symbol: Symbol,
    /// Price of the earliest input in the bucket.
    pub open: Decimal,
    /// Maximum price across inputs in the bucket.
    pub high: Decimal,
    /// Minimum price across inputs in the bucket.
    pub low: Decimal,
    /// Price of the latest input in the bucket.
    pub close: Decimal,
    /// Number of raw ticks summarized by this bar.
    pub tick_count: u64,
}

impl Bar {
    /// Fold a bucket's ticks into a bar, sampling the bid price.
    ///
    /// Ticks must be in source-query order (time ascending); inputs with
    /// identical timestamps break open/close ties by that input order.
    /// Returns `None` for an empty bucket; gaps produce no bar.
    #[must_use]
    pub fn from_ticks(symbol: &str, bucket_start: DateTime<Utc>, ticks: &[Tick]) -> Option<Self> {
        let first = ticks.first()?;
        let last = ticks.last()?;

        let mut high = first.bid;
        let mut low = first.bid;
        for tick in ticks {
            if tick.bid > high {
                high = tick.bid;
            }
            if tick.bid < low {
                low = tick.bid;
            }
        }

        Some(Self {
            time: bucket_start,
            symbol: symbol.to_string(),
            open: first.bid,
            high,
            low,
            close: last.bid,
            tick_count: ticks.len() as u64,
        })
    }

    /// Roll child-tier bars up into one wider bar.
    ///
    /// Child bars must be in source-query order (time ascending). The
    /// result takes the first child's open, the last child's close, the
    /// extreme high/low, and the summed `tick_count`. Returns `None` when
    /// no child bars fall in the bucket.
    #[must_use]
    pub fn from_bars(symbol: &str, bucket_start: DateTime<Utc>, bars: &[Self]) -> Option<Self> {
        let first = bars.first()?;
        let last = bars.last()?;

        let mut high = first.high;
        let mut low = first.low;
        let mut tick_count: u64 = 0;
        for bar in bars {
            if bar.high > high {
                high = bar.high;
            }
            if bar.low < low {
                low = bar.low;
            }
            tick_count += bar.tick_count;
        }

        Some(Self {
            time: bucket_start,
            symbol: symbol.to_string(),
            open: first.open,
            high,
            low,
            close: last.close,
            tick_count,
        })
    }
}
