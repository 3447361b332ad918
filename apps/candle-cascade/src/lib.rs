#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Candle Cascade - Hierarchical Bar Aggregation Service
//!
//! Ingests best-quote ticks from Kraken's WebSocket feed and maintains a
//! chain of OHLC bar tiers (1m, 5m, 15m, 1h, 4h, 12h), each derived from
//! the tier below and refreshed bottom-up on a fixed cadence.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core market-data types with no I/O
//!   - `market_data`: Ticks, bars, and OHLC folding
//!   - `tier`: The timeframe chain and bucket alignment
//!   - `watermark`: Per-tier refresh progress records
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Storage contracts for ticks, bars, and watermarks
//!   - `services`: Ingestion, tier refresh, cascade scheduling, staleness
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kraken`: WebSocket feed client with reconnect backoff
//!   - `persistence`: In-memory store implementations
//!   - `http`: Query API, health, and metrics endpoints
//!   - `config`: Environment-driven configuration
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry wiring
//!
//! # Data Flow
//!
//! ```text
//! Kraken WS --> Feed Client --> Ingestion --> Tick Store
//!                                                 |
//!                                        Cascade Scheduler
//!                                         (every cadence)
//!                                                 v
//!                        1m -> 5m -> 15m -> 1h -> 4h -> 12h   (Bar Store)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market-data types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{Bar, Symbol, Tick};
pub use domain::tier::{TierChain, TierChainError, TierSource, TierSpec};
pub use domain::watermark::{TierStatus, Watermark};

// Ports
pub use application::ports::{BarStore, StoreError, TickStore, WatermarkStore};

// Services (for integration tests)
pub use application::services::cascade::{
    CascadeConfig, CascadeError, CascadeReport, CascadeScheduler, SymbolOutcome,
};
pub use application::services::ingestion::{FlushRetryPolicy, IngestionConfig, IngestionService};
pub use application::services::refresh::{RefreshError, RefreshOutcome, TierRefresher};
pub use application::services::staleness::StalenessMonitor;

// Infrastructure config
pub use infrastructure::config::{Config, ConfigError};

// API server
pub use infrastructure::http::{ApiServer, ApiServerError, AppState};

// Feed client (for integration tests)
pub use infrastructure::kraken::{
    ConnectionState, FeedEvent, KrakenClient, KrakenClientConfig, PairMapping, ReconnectConfig,
};

// Storage adapters (for integration tests)
pub use infrastructure::persistence::{
    InMemoryBarStore, InMemoryTickStore, InMemoryWatermarkStore,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
