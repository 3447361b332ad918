//! Watermarks and Tier Status
//!
//! A watermark records, per `(symbol, tier)`, the timestamp up to which
//! that tier's last successful refresh is known-complete. The scheduler
//! reads it to pick the next refresh window; the staleness path derives
//! tier status from it. Only a successful refresh advances a watermark;
//! a failed or timed-out refresh leaves it untouched, and the next pass
//! resumes from it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Refresh progress for one `(symbol, tier)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Canonical symbol.
    pub symbol: String,
    /// 1-based tier index.
    pub tier: u8,
    /// Data is known-complete up to (exclusive) this instant.
    pub through: DateTime<Utc>,
    /// Wall-clock time of the last advance.
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    /// Freshness gap of the tier: `now - through`.
    #[must_use]
    pub fn lag(&self, now: DateTime<Utc>) -> Duration {
        now - self.through
    }
}

/// Read-only freshness report for one tier of one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStatus {
    /// 1-based tier index.
    pub tier: u8,
    /// Granularity label (e.g. `5m`).
    pub label: String,
    /// Data watermark, if the tier has ever refreshed.
    pub watermark: Option<DateTime<Utc>>,
    /// Wall-clock time of the last watermark advance.
    pub updated_at: Option<DateTime<Utc>>,
    /// `now - watermark` in seconds; `None` before the first refresh.
    pub lag_seconds: Option<f64>,
}
