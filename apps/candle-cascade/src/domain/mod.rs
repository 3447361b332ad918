//! Domain Layer - Core aggregation types and business logic.
//!
//! This layer contains the pure types of the pipeline (ticks, bars, the
//! tier hierarchy) with no I/O dependencies. All bucket arithmetic and
//! OHLC fold semantics live here.

/// Tick and bar types with OHLC fold constructors.
pub mod market_data;

/// Tier descriptors, chain validation, and bucket alignment.
pub mod tier;

/// Refresh progress records and tier freshness status.
pub mod watermark;
