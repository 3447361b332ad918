//! In-memory tick, bar, and watermark stores.
//!
//! Reference implementations of the storage ports backed by
//! `parking_lot::RwLock` maps. Range queries come back ordered by time
//! because ticks and bars are keyed in `BTreeMap`s, mirroring the
//! `ORDER BY time` contract a durable engine would provide.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{BarStore, StoreError, TickStore, WatermarkStore};
use crate::domain::market_data::{Bar, Symbol, Tick};
use crate::domain::watermark::Watermark;

// =============================================================================
// Tick Store
// =============================================================================

/// In-memory implementation of [`TickStore`].
///
/// Upsert on `(symbol, time)` falls out of the map key: a colliding write
/// replaces the stored tick (last write wins).
#[derive(Debug, Default)]
pub struct InMemoryTickStore {
    ticks: RwLock<HashMap<Symbol, BTreeMap<DateTime<Utc>, Tick>>>,
}

impl InMemoryTickStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticks: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of stored ticks across all symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.read().values().map(BTreeMap::len).sum()
    }

    /// Check if the store holds no ticks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all ticks (for test setup).
    pub fn clear(&self) {
        self.ticks.write().clear();
    }
}

#[async_trait]
impl TickStore for InMemoryTickStore {
    async fn upsert(&self, ticks: &[Tick]) -> Result<(), StoreError> {
        let mut map = self.ticks.write();
        for tick in ticks {
            map.entry(tick.symbol.clone())
                .or_default()
                .insert(tick.time, tick.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, StoreError> {
        // BTreeMap::range panics on inverted bounds.
        if from >= to {
            return Ok(Vec::new());
        }
        let map = self.ticks.read();
        Ok(map.get(symbol).map_or_else(Vec::new, |by_time| {
            by_time.range(from..to).map(|(_, t)| t.clone()).collect()
        }))
    }

    async fn earliest_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let map = self.ticks.read();
        Ok(map
            .get(symbol)
            .and_then(|by_time| by_time.keys().next().copied()))
    }
}

// =============================================================================
// Bar Store
// =============================================================================

/// In-memory implementation of [`BarStore`].
#[derive(Debug, Default)]
pub struct InMemoryBarStore {
    bars: RwLock<HashMap<(u8, Symbol), BTreeMap<DateTime<Utc>, Bar>>>,
}

impl InMemoryBarStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bars: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored bars for one `(tier, symbol)`.
    #[must_use]
    pub fn len(&self, tier: u8, symbol: &str) -> usize {
        self.bars
            .read()
            .get(&(tier, symbol.to_string()))
            .map_or(0, BTreeMap::len)
    }

    /// Clear all bars (for test setup).
    pub fn clear(&self) {
        self.bars.write().clear();
    }
}

#[async_trait]
impl BarStore for InMemoryBarStore {
    async fn replace_range(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bars: &[Bar],
    ) -> Result<(), StoreError> {
        // BTreeMap::range panics on inverted bounds.
        if from >= to {
            return Ok(());
        }
        let mut map = self.bars.write();
        let by_time = map.entry((tier, symbol.to_string())).or_default();

        // Full-replace: drop everything previously stored in the range,
        // then insert the recomputed set. Emptied buckets stay gone.
        let stale: Vec<DateTime<Utc>> = by_time.range(from..to).map(|(t, _)| *t).collect();
        for time in stale {
            by_time.remove(&time);
        }
        for bar in bars {
            by_time.insert(bar.time, bar.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        // BTreeMap::range panics on inverted bounds.
        if from >= to {
            return Ok(Vec::new());
        }
        let map = self.bars.read();
        Ok(map
            .get(&(tier, symbol.to_string()))
            .map_or_else(Vec::new, |by_time| {
                by_time.range(from..to).map(|(_, b)| b.clone()).collect()
            }))
    }
}

// =============================================================================
// Watermark Store
// =============================================================================

/// In-memory implementation of [`WatermarkStore`].
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    marks: RwLock<HashMap<(Symbol, u8), Watermark>>,
}

impl InMemoryWatermarkStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            marks: RwLock::new(HashMap::new()),
        }
    }

    /// Clear all watermarks (for test setup).
    pub fn clear(&self) {
        self.marks.write().clear();
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, symbol: &str, tier: u8) -> Result<Option<Watermark>, StoreError> {
        let marks = self.marks.read();
        Ok(marks.get(&(symbol.to_string(), tier)).cloned())
    }

    async fn advance(
        &self,
        symbol: &str,
        tier: u8,
        through: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut marks = self.marks.write();
        let key = (symbol.to_string(), tier);
        match marks.get_mut(&key) {
            // Monotonic: never move a watermark backwards.
            Some(existing) if existing.through >= through => {}
            Some(existing) => {
                existing.through = through;
                existing.updated_at = Utc::now();
            }
            None => {
                marks.insert(
                    key,
                    Watermark {
                        symbol: symbol.to_string(),
                        tier,
                        through,
                        updated_at: Utc::now(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn all_for_symbol(&self, symbol: &str) -> Result<Vec<Watermark>, StoreError> {
        let marks = self.marks.read();
        let mut result: Vec<Watermark> = marks
            .values()
            .filter(|w| w.symbol == symbol)
            .cloned()
            .collect();
        result.sort_by_key(|w| w.tier);
        Ok(result)
    }
}
