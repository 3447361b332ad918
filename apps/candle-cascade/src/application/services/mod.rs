//! Application services for the aggregation pipeline.

/// Cascade scheduling: cadence loop, single-flight runs, backfill.
pub mod cascade;

/// Tick buffering and batched persistence with bounded retry.
pub mod ingestion;

/// Range-scoped tier recomputation.
pub mod refresh;

/// Watermark-derived tier freshness reporting.
pub mod staleness;
