//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Environment-driven configuration.
pub mod config;

/// HTTP API, health, and metrics endpoints.
pub mod http;

/// Kraken WebSocket feed adapter.
pub mod kraken;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Storage adapters for ticks, bars, and watermarks.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
