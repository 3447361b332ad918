//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the services that orchestrate the aggregation
//! pipeline and the port interfaces they depend on. Services hold no
//! storage of their own; everything flows through the ports.

/// Port interfaces for tick, bar, and watermark storage.
pub mod ports;

/// Ingestion, refresh, cascade, and staleness services.
pub mod services;
