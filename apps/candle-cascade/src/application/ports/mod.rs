//! Port Interfaces
//!
//! Storage contracts the pipeline consumes but does not own, following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these; the services only ever see the traits.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`TickStore`]: raw tick persistence, upsert on `(symbol, time)`
//! - [`BarStore`]: per-tier bar persistence, range-replace semantics
//! - [`WatermarkStore`]: per-`(symbol, tier)` refresh progress records
//!
//! All port methods are async and object-safe; services hold them as
//! `Arc<dyn …>` so tests can substitute in-memory or failing doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::market_data::{Bar, Tick};
use crate::domain::watermark::Watermark;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by storage ports.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed or rejected a write.
    #[error("store write failed: {reason}")]
    WriteFailure {
        /// Human-readable failure cause.
        reason: String,
    },

    /// The backing store failed a read.
    #[error("store query failed: {reason}")]
    QueryFailure {
        /// Human-readable failure cause.
        reason: String,
    },
}

impl StoreError {
    /// Convenience constructor for write failures.
    #[must_use]
    pub fn write(reason: impl Into<String>) -> Self {
        Self::WriteFailure {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for query failures.
    #[must_use]
    pub fn query(reason: impl Into<String>) -> Self {
        Self::QueryFailure {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Tick Store
// =============================================================================

/// Raw tick persistence.
///
/// `(symbol, time)` is the unique key; writes are last-write-wins upserts
/// and must be atomic per record and idempotent under retry.
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Upsert a batch of ticks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailure`] when the store is unavailable
    /// or rejects the batch.
    async fn upsert(&self, ticks: &[Tick]) -> Result<(), StoreError>;

    /// Query ticks for `symbol` in `[from, to)`, ordered by time ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailure`] when the read fails.
    async fn query(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, StoreError>;

    /// Earliest stored tick time for `symbol`, if any.
    ///
    /// Used for cold starts, when no watermark exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailure`] when the read fails.
    async fn earliest_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>, StoreError>;
}

// =============================================================================
// Bar Store
// =============================================================================

/// Per-tier bar persistence.
///
/// Bars are fully derived: a refresh replaces every bar in its aligned
/// range wholesale, which also removes bars for buckets that recomputed
/// to empty.
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Replace all bars for `(tier, symbol)` in `[from, to)` with `bars`.
    ///
    /// Stored bars in the range but absent from `bars` are deleted. The
    /// call is idempotent: repeating it with the same inputs leaves the
    /// store unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailure`] when the store is unavailable
    /// or rejects the write.
    async fn replace_range(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bars: &[Bar],
    ) -> Result<(), StoreError>;

    /// Query bars for `(tier, symbol)` in `[from, to)`, ordered by time
    /// ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailure`] when the read fails.
    async fn query(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError>;
}

// =============================================================================
// Watermark Store
// =============================================================================

/// Per-`(symbol, tier)` refresh progress records.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Fetch the watermark for `(symbol, tier)`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailure`] when the read fails.
    async fn get(&self, symbol: &str, tier: u8) -> Result<Option<Watermark>, StoreError>;

    /// Advance the watermark for `(symbol, tier)` to `through`.
    ///
    /// Watermarks are monotonic: a call with `through` at or before the
    /// stored value is a no-op (backfill repairs history without moving
    /// progress backwards).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailure`] when the write fails.
    async fn advance(&self, symbol: &str, tier: u8, through: DateTime<Utc>)
    -> Result<(), StoreError>;

    /// All watermarks recorded for `symbol`, ordered by tier ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueryFailure`] when the read fails.
    async fn all_for_symbol(&self, symbol: &str) -> Result<Vec<Watermark>, StoreError>;
}
