//! Aggregation Tier Chain
//!
//! Describes the hierarchy of bar granularities and the bucket arithmetic
//! shared by refresh and scheduling. Each tier declares its bucket width
//! and its source: raw ticks for the first tier, the tier directly below
//! for every other. The chain is strictly linear: fan-in, fan-out, and
//! cycles are rejected when the chain is built, so the rest of the
//! system never re-validates it.
//!
//! The standard chain mirrors the candle views this service replaces:
//! `1m -> 5m -> 15m -> 1h -> 4h -> 12h`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Errors
// =============================================================================

/// Validation errors raised while building a [`TierChain`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TierChainError {
    /// The chain has no tiers at all.
    #[error("tier chain must contain at least one tier")]
    Empty,

    /// Tier indexes must be contiguous and start at 1.
    #[error("tier indexes must be contiguous starting at 1, found {found} at position {position}")]
    NonContiguousIndex {
        /// Index found in the descriptor.
        found: u8,
        /// Zero-based position in the input.
        position: usize,
    },

    /// The first tier must read raw ticks.
    #[error("tier 1 must source raw ticks, found tier {found} as source")]
    FirstTierNotRaw {
        /// The tier index wrongly declared as source.
        found: u8,
    },

    /// A higher tier must read exactly the tier below it. This also rules
    /// out cycles and fan-in: no descriptor can name itself, a higher
    /// tier, or anything but its immediate predecessor.
    #[error("tier {index} must source tier {expected}, found {found:?}")]
    NonLinearSource {
        /// The offending tier.
        index: u8,
        /// The only legal source for it.
        expected: u8,
        /// What the descriptor actually declared.
        found: TierSource,
    },

    /// Bucket widths must be positive.
    #[error("tier {index} bucket width must be positive")]
    NonPositiveWidth {
        /// The offending tier.
        index: u8,
    },

    /// Each width must be a strictly larger integer multiple of its
    /// source's width, so child buckets nest exactly inside parents.
    #[error(
        "tier {index} width {width_secs}s must be a strictly larger multiple of source width {source_secs}s"
    )]
    NonMultipleWidth {
        /// The offending tier.
        index: u8,
        /// Its bucket width in seconds.
        width_secs: i64,
        /// The source tier's bucket width in seconds.
        source_secs: i64,
    },

    /// Two tiers share the same label.
    #[error("duplicate tier label {label:?}")]
    DuplicateLabel {
        /// The repeated label.
        label: String,
    },
}

// =============================================================================
// Types
// =============================================================================

/// Where a tier reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierSource {
    /// The raw tick store (first tier only).
    RawTicks,
    /// The tier with the given index (must be `index - 1`).
    Tier(u8),
}

/// Descriptor for one granularity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSpec {
    /// 1-based position in the chain.
    pub index: u8,
    /// Human-readable granularity label (e.g. `5m`, `1h`).
    pub label: String,
    /// Bucket width.
    pub bucket_width: Duration,
    /// Declared input.
    pub source: TierSource,
}

impl TierSpec {
    /// Create a tier descriptor.
    #[must_use]
    pub fn new(index: u8, label: &str, bucket_width: Duration, source: TierSource) -> Self {
        Self {
            index,
            label: label.to_string(),
            bucket_width,
            source,
        }
    }

    /// Start of the bucket containing `t`.
    ///
    /// Buckets are aligned to the Unix epoch, matching `time_bucket`
    /// semantics in the candle views this service replaces.
    #[must_use]
    pub fn bucket_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let width_us = self.bucket_width.num_microseconds().unwrap_or(i64::MAX);
        let rem = t.timestamp_micros().rem_euclid(width_us);
        t - Duration::microseconds(rem)
    }

    /// Align `t` down to the nearest bucket boundary (identity when
    /// already aligned).
    #[must_use]
    pub fn align_down(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.bucket_start(t)
    }

    /// Align `t` up to the nearest bucket boundary (identity when already
    /// aligned).
    #[must_use]
    pub fn align_up(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let down = self.bucket_start(t);
        if down == t { t } else { down + self.bucket_width }
    }
}

// =============================================================================
// Tier Chain
// =============================================================================

/// The validated, strictly linear hierarchy of tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierChain {
    tiers: Vec<TierSpec>,
}

fn standard_tiers() -> Vec<TierSpec> {
    vec![
        TierSpec::new(1, "1m", Duration::minutes(1), TierSource::RawTicks),
        TierSpec::new(2, "5m", Duration::minutes(5), TierSource::Tier(1)),
        TierSpec::new(3, "15m", Duration::minutes(15), TierSource::Tier(2)),
        TierSpec::new(4, "1h", Duration::hours(1), TierSource::Tier(3)),
        TierSpec::new(5, "4h", Duration::hours(4), TierSource::Tier(4)),
        TierSpec::new(6, "12h", Duration::hours(12), TierSource::Tier(5)),
    ]
}

impl TierChain {
    /// Build a chain from descriptors, validating linearity and widths.
    ///
    /// # Errors
    ///
    /// Returns a [`TierChainError`] when the descriptors do not form a
    /// linear chain of nesting bucket widths rooted at raw ticks.
    pub fn new(tiers: Vec<TierSpec>) -> Result<Self, TierChainError> {
        if tiers.is_empty() {
            return Err(TierChainError::Empty);
        }

        for (position, tier) in tiers.iter().enumerate() {
            // A chain longer than u8 cannot keep contiguous u8 indexes.
            let expected_index = u8::try_from(position + 1).unwrap_or(0);
            if expected_index == 0 || tier.index != expected_index {
                return Err(TierChainError::NonContiguousIndex {
                    found: tier.index,
                    position,
                });
            }

            if tier.bucket_width <= Duration::zero() {
                return Err(TierChainError::NonPositiveWidth { index: tier.index });
            }

            if position == 0 {
                if let TierSource::Tier(found) = tier.source {
                    return Err(TierChainError::FirstTierNotRaw { found });
                }
                continue;
            }

            let expected_source = expected_index - 1;
            if tier.source != TierSource::Tier(expected_source) {
                return Err(TierChainError::NonLinearSource {
                    index: tier.index,
                    expected: expected_source,
                    found: tier.source,
                });
            }

            let source_width = tiers[position - 1].bucket_width;
            let width_secs = tier.bucket_width.num_seconds();
            let source_secs = source_width.num_seconds();
            if width_secs <= source_secs || width_secs % source_secs != 0 {
                return Err(TierChainError::NonMultipleWidth {
                    index: tier.index,
                    width_secs,
                    source_secs,
                });
            }
        }

        for (position, tier) in tiers.iter().enumerate() {
            if tiers[..position].iter().any(|t| t.label == tier.label) {
                return Err(TierChainError::DuplicateLabel {
                    label: tier.label.clone(),
                });
            }
        }

        Ok(Self { tiers })
    }

    /// The standard production chain: 1m, 5m, 15m, 1h, 4h, 12h.
    #[must_use]
    pub fn standard() -> Self {
        // The test suite runs these descriptors through `new`.
        Self {
            tiers: standard_tiers(),
        }
    }

    /// Number of tiers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the chain is empty (never true for a validated chain).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Look up a tier by its 1-based index.
    #[must_use]
    pub fn get(&self, index: u8) -> Option<&TierSpec> {
        if index == 0 {
            return None;
        }
        self.tiers.get(usize::from(index) - 1)
    }

    /// Look up a tier by label (e.g. `"5m"`).
    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<&TierSpec> {
        self.tiers.iter().find(|t| t.label == label)
    }

    /// Iterate tiers bottom-up (tier 1 first).
    pub fn iter(&self) -> impl Iterator<Item = &TierSpec> {
        self.tiers.iter()
    }
}
