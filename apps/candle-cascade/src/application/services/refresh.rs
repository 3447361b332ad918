//! Tier Refresh
//!
//! Range-scoped recomputation of one tier's bars. A refresh aligns the
//! requested window outward to the tier's bucket boundaries, reads the
//! declared source (raw ticks for tier 1, the tier below otherwise),
//! folds each bucket, and replaces the stored bars for the whole aligned
//! range in one write.
//!
//! # Design
//!
//! - **Idempotent**: the fold is deterministic and the write is a full
//!   range replace, so refreshing the same range twice with no new input
//!   yields identical bars.
//! - **Watermark-free**: the refresher never touches watermarks. The
//!   scheduler advances them after a successful call; backfill reuses
//!   `refresh` without moving them at all.
//! - Caller is responsible for keeping the upper bound at or below
//!   `now - safety_margin` on the steady-state path; the refresher itself
//!   accepts any range so that backfill can target arbitrary history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::application::ports::{BarStore, StoreError, TickStore};
use crate::domain::market_data::Bar;
use crate::domain::tier::{TierChain, TierSource, TierSpec};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by a tier refresh.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The tier index does not exist in the configured chain.
    #[error("unknown tier index {tier}")]
    UnknownTier {
        /// The requested index.
        tier: u8,
    },

    /// Reading the tier's source failed.
    #[error("tier {tier} source read failed: {source}")]
    SourceRead {
        /// The tier being refreshed.
        tier: u8,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Writing the recomputed bars failed.
    #[error("tier {tier} bar write failed: {source}")]
    BarWrite {
        /// The tier being refreshed.
        tier: u8,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

// =============================================================================
// Types
// =============================================================================

/// Summary of one completed refresh call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Lower bound actually refreshed (aligned down).
    pub aligned_from: DateTime<Utc>,
    /// Upper bound actually refreshed (aligned up).
    pub aligned_to: DateTime<Utc>,
    /// Number of bars written for the range.
    pub bars_written: usize,
}

// =============================================================================
// Tier Refresher
// =============================================================================

/// Recomputes bars for any tier in the chain.
pub struct TierRefresher {
    chain: TierChain,
    tick_store: Arc<dyn TickStore>,
    bar_store: Arc<dyn BarStore>,
}

impl TierRefresher {
    /// Create a refresher over the given chain and stores.
    #[must_use]
    pub fn new(
        chain: TierChain,
        tick_store: Arc<dyn TickStore>,
        bar_store: Arc<dyn BarStore>,
    ) -> Self {
        Self {
            chain,
            tick_store,
            bar_store,
        }
    }

    /// The tier chain this refresher operates on.
    #[must_use]
    pub const fn chain(&self) -> &TierChain {
        &self.chain
    }

    /// Recompute all buckets of `tier` whose start falls in `[from, to)`.
    ///
    /// Bounds are aligned outward to bucket boundaries first, so a
    /// mid-bucket request recomputes the whole surrounding bucket. An
    /// empty (or inverted) range is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError::UnknownTier`] for an index outside the
    /// chain, [`RefreshError::SourceRead`] when the source query fails,
    /// and [`RefreshError::BarWrite`] when the replace write fails.
    pub async fn refresh(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RefreshOutcome, RefreshError> {
        let spec = self
            .chain
            .get(tier)
            .ok_or(RefreshError::UnknownTier { tier })?;

        let aligned_from = spec.align_down(from);
        let aligned_to = spec.align_up(to);
        if aligned_from >= aligned_to {
            return Ok(RefreshOutcome {
                aligned_from,
                aligned_to: aligned_from,
                bars_written: 0,
            });
        }

        let bars = match spec.source {
            TierSource::RawTicks => {
                let ticks = self
                    .tick_store
                    .query(symbol, aligned_from, aligned_to)
                    .await
                    .map_err(|source| RefreshError::SourceRead { tier, source })?;
                fold_buckets(spec, symbol, aligned_from, aligned_to, &ticks, |t| t.time, Bar::from_ticks)
            }
            TierSource::Tier(source_tier) => {
                let child_bars = self
                    .bar_store
                    .query(source_tier, symbol, aligned_from, aligned_to)
                    .await
                    .map_err(|source| RefreshError::SourceRead { tier, source })?;
                fold_buckets(spec, symbol, aligned_from, aligned_to, &child_bars, |b| b.time, Bar::from_bars)
            }
        };

        self.bar_store
            .replace_range(tier, symbol, aligned_from, aligned_to, &bars)
            .await
            .map_err(|source| RefreshError::BarWrite { tier, source })?;

        debug!(
            symbol = %symbol,
            tier = spec.index,
            label = %spec.label,
            from = %aligned_from,
            to = %aligned_to,
            bars = bars.len(),
            "Tier refreshed"
        );

        Ok(RefreshOutcome {
            aligned_from,
            aligned_to,
            bars_written: bars.len(),
        })
    }
}

/// Walk the aligned range bucket by bucket and fold each bucket's inputs.
///
/// Inputs must be ordered by time ascending (the store contract); the walk
/// advances a single cursor, so each input is visited exactly once.
fn fold_buckets<T>(
    spec: &TierSpec,
    symbol: &str,
    aligned_from: DateTime<Utc>,
    aligned_to: DateTime<Utc>,
    inputs: &[T],
    time_of: impl Fn(&T) -> DateTime<Utc>,
    fold: impl Fn(&str, DateTime<Utc>, &[T]) -> Option<Bar>,
) -> Vec<Bar> {
    let mut out = Vec::new();
    let mut cursor = 0;
    let mut bucket_start = aligned_from;

    while bucket_start < aligned_to {
        let bucket_end = bucket_start + spec.bucket_width;
        let begin = cursor;
        while cursor < inputs.len() && time_of(&inputs[cursor]) < bucket_end {
            cursor += 1;
        }
        if let Some(bar) = fold(symbol, bucket_start, &inputs[begin..cursor]) {
            out.push(bar);
        }
        bucket_start = bucket_end;
    }

    out
}
