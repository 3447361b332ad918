//! Staleness Monitor
//!
//! Read side of tier freshness. Status is derived from the watermark
//! store alone, never by scanning bar tables, so the answer is O(tiers)
//! regardless of history size. A tier that has never refreshed shows up
//! explicitly with no watermark rather than being omitted.
//!
//! In steady state a healthy tier's lag stays within a small multiple of
//! the cascade cadence; a lag that keeps growing means its refreshes are
//! failing or timing out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::application::ports::{StoreError, WatermarkStore};
use crate::domain::tier::TierChain;
use crate::domain::watermark::{TierStatus, Watermark};

/// Answers per-tier freshness queries for a symbol.
pub struct StalenessMonitor {
    chain: TierChain,
    watermarks: Arc<dyn WatermarkStore>,
}

impl StalenessMonitor {
    /// Create a monitor over the given chain and watermark store.
    #[must_use]
    pub fn new(chain: TierChain, watermarks: Arc<dyn WatermarkStore>) -> Self {
        Self { chain, watermarks }
    }

    /// Report every configured tier for `symbol`, lowest first.
    ///
    /// Tiers that have never completed a refresh are included with an
    /// empty watermark and no lag.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`StoreError`] when the watermark store
    /// cannot be read.
    #[allow(clippy::cast_precision_loss)]
    pub async fn tier_status(&self, symbol: &str) -> Result<Vec<TierStatus>, StoreError> {
        let marks = self.watermarks.all_for_symbol(symbol).await?;
        let by_tier: HashMap<u8, Watermark> =
            marks.into_iter().map(|mark| (mark.tier, mark)).collect();

        let now = Utc::now();
        let statuses = self
            .chain
            .iter()
            .map(|spec| match by_tier.get(&spec.index) {
                Some(mark) => TierStatus {
                    tier: spec.index,
                    label: spec.label.clone(),
                    watermark: Some(mark.through),
                    updated_at: Some(mark.updated_at),
                    lag_seconds: Some(mark.lag(now).num_milliseconds() as f64 / 1000.0),
                },
                None => TierStatus {
                    tier: spec.index,
                    label: spec.label.clone(),
                    watermark: None,
                    updated_at: None,
                    lag_seconds: None,
                },
            })
            .collect();

        Ok(statuses)
    }
}
