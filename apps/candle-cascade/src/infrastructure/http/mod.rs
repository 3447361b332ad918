//! HTTP API, Health, and Metrics Endpoints
//!
//! Single axum server for bar queries, operational actions, health
//! checks, and Prometheus metrics. Used by downstream consumers,
//! operators, container orchestrators, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /v1/bars/{symbol}?tier=5m&from=..&to=..` - Bars for one tier, ascending
//! - `GET /v1/tiers/{symbol}` - Per-tier watermark and staleness report
//! - `POST /v1/cascade/run` - Trigger a cascade pass now (409 if one is running)
//! - `POST /v1/backfill` - Recompute one tier over a historical range
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the feed)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{BarStore, StoreError};
use crate::application::services::cascade::{CascadeError, CascadeScheduler, SymbolOutcome};
use crate::application::services::staleness::StalenessMonitor;
use crate::domain::market_data::Bar;
use crate::domain::tier::TierChain;
use crate::domain::watermark::TierStatus;
use crate::infrastructure::kraken::{ConnectionState, KrakenClient};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub feed: FeedStatus,
    /// Per-symbol tier staleness.
    pub symbols: Vec<SymbolStaleness>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed streaming, pipeline serving.
    Healthy,
    /// Feed down but stored data still served.
    Degraded,
    /// Feed has never come up.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatus {
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Whether ticks are currently flowing.
    pub connected: bool,
}

/// Tier staleness for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolStaleness {
    /// Canonical symbol.
    pub symbol: String,
    /// Status per tier, lowest first.
    pub tiers: Vec<TierStatus>,
}

/// Health classification for a feed state.
///
/// Queries keep working from stored bars while the feed reconnects, so
/// an interrupted feed is degraded rather than unhealthy.
const fn feed_health(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Streaming => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected => HealthStatus::Unhealthy,
    }
}

/// Readiness: live feed, or an established session riding out a backoff.
const fn is_ready(state: ConnectionState) -> bool {
    matches!(
        state,
        ConnectionState::Streaming | ConnectionState::Reconnecting
    )
}

// =============================================================================
// API Request / Response Types
// =============================================================================

/// Query string for `GET /v1/bars/{symbol}`.
#[derive(Debug, Deserialize)]
pub struct BarsQuery {
    /// Tier label, e.g. `5m`.
    pub tier: String,
    /// Inclusive lower bound (RFC 3339).
    pub from: DateTime<Utc>,
    /// Exclusive upper bound (RFC 3339).
    pub to: DateTime<Utc>,
}

/// Body for `POST /v1/cascade/run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Restrict the pass to one symbol; all configured symbols if absent.
    pub symbol: Option<String>,
}

/// Response for `POST /v1/cascade/run`.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    /// Run id, also present in the run's log lines.
    pub run_id: Uuid,
    /// Per-symbol results, in processing order.
    pub outcomes: Vec<RunOutcome>,
}

/// One symbol's result within a triggered run.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    /// Canonical symbol.
    pub symbol: String,
    /// "completed", "aborted", "cancelled", or "no_data".
    pub status: &'static str,
    /// Tiers whose refresh ran, for completed and cancelled walks.
    pub tiers_refreshed: Option<u8>,
    /// The tier that failed, for aborted walks.
    pub failed_tier: Option<u8>,
    /// Failure description, for aborted walks.
    pub error: Option<String>,
}

impl RunOutcome {
    fn from_outcome(symbol: &str, outcome: &SymbolOutcome) -> Self {
        match outcome {
            SymbolOutcome::Completed { tiers_refreshed } => Self {
                symbol: symbol.to_string(),
                status: "completed",
                tiers_refreshed: Some(*tiers_refreshed),
                failed_tier: None,
                error: None,
            },
            SymbolOutcome::Aborted { failed_tier, error } => Self {
                symbol: symbol.to_string(),
                status: "aborted",
                tiers_refreshed: None,
                failed_tier: Some(*failed_tier),
                error: Some(error.to_string()),
            },
            SymbolOutcome::Cancelled { tiers_completed } => Self {
                symbol: symbol.to_string(),
                status: "cancelled",
                tiers_refreshed: Some(*tiers_completed),
                failed_tier: None,
                error: None,
            },
            SymbolOutcome::NoData => Self {
                symbol: symbol.to_string(),
                status: "no_data",
                tiers_refreshed: None,
                failed_tier: None,
                error: None,
            },
        }
    }
}

/// Body for `POST /v1/backfill`.
#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    /// Canonical symbol.
    pub symbol: String,
    /// Tier label, e.g. `1h`.
    pub tier: String,
    /// Inclusive lower bound (RFC 3339).
    pub from: DateTime<Utc>,
    /// Exclusive upper bound (RFC 3339).
    pub to: DateTime<Utc>,
}

/// Response for `POST /v1/backfill`.
#[derive(Debug, Serialize)]
pub struct BackfillResponse {
    /// Canonical symbol.
    pub symbol: String,
    /// Tier label that was recomputed.
    pub tier: String,
    /// Lower bound actually recomputed (bucket-aligned down).
    pub aligned_from: DateTime<Utc>,
    /// Upper bound actually recomputed (bucket-aligned up).
    pub aligned_to: DateTime<Utc>,
    /// Bars written for the range.
    pub bars_written: usize,
}

// =============================================================================
// API Errors
// =============================================================================

/// Errors returned to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The tier label does not name a configured tier.
    #[error("unknown tier label: {0}")]
    UnknownTier(String),

    /// A cascade pass already holds the single-flight lock.
    #[error("a cascade run is already in progress")]
    RunInProgress,

    /// Storage read failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cascade or backfill operation failed.
    #[error(transparent)]
    Cascade(CascadeError),
}

impl From<CascadeError> for ApiError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::AlreadyRunning => Self::RunInProgress,
            other => Self::Cascade(other),
        }
    }
}

impl ApiError {
    const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownTier(_) => StatusCode::BAD_REQUEST,
            Self::RunInProgress => StatusCode::CONFLICT,
            Self::Store(_) | Self::Cascade(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// API Server State
// =============================================================================

/// Shared state for the API server.
pub struct AppState {
    version: String,
    started_at: Instant,
    chain: TierChain,
    scheduler: Arc<CascadeScheduler>,
    bars: Arc<dyn BarStore>,
    monitor: Arc<StalenessMonitor>,
    feed: Arc<KrakenClient>,
    symbols: Vec<String>,
}

impl AppState {
    /// Create new API server state.
    #[must_use]
    pub fn new(
        version: String,
        chain: TierChain,
        scheduler: Arc<CascadeScheduler>,
        bars: Arc<dyn BarStore>,
        monitor: Arc<StalenessMonitor>,
        feed: Arc<KrakenClient>,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            chain,
            scheduler,
            bars,
            monitor,
            feed,
            symbols,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// HTTP server for queries, operations, health, and metrics.
pub struct ApiServer {
    bind_addr: String,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(bind_addr: String, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            bind_addr,
            state,
            cancel,
        }
    }

    /// Run the API server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let app = router(self.state);

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.bind_addr.clone(), e.to_string()))?;

        tracing::info!(addr = %self.bind_addr, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/bars/{symbol}", get(bars_handler))
        .route("/v1/tiers/{symbol}", get(tiers_handler))
        .route("/v1/cascade/run", post(cascade_run_handler))
        .route("/v1/backfill", post(backfill_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn bars_handler(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<BarsQuery>,
) -> Result<Json<Vec<Bar>>, ApiError> {
    let spec = state
        .chain
        .by_label(&query.tier)
        .ok_or_else(|| ApiError::UnknownTier(query.tier.clone()))?;

    let bars = state
        .bars
        .query(spec.index, &symbol, query.from, query.to)
        .await?;

    Ok(Json(bars))
}

async fn tiers_handler(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<TierStatus>>, ApiError> {
    let statuses = state.monitor.tier_status(&symbol).await?;
    Ok(Json(statuses))
}

async fn cascade_run_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<RunResponse>, ApiError> {
    let symbol = body.and_then(|Json(request)| request.symbol);

    let report = state.scheduler.run_now(symbol.as_deref()).await?;

    let outcomes = report
        .outcomes
        .iter()
        .map(|(symbol, outcome)| RunOutcome::from_outcome(symbol, outcome))
        .collect();

    Ok(Json(RunResponse {
        run_id: report.run_id,
        outcomes,
    }))
}

async fn backfill_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BackfillRequest>,
) -> Result<Json<BackfillResponse>, ApiError> {
    let spec = state
        .chain
        .by_label(&request.tier)
        .ok_or_else(|| ApiError::UnknownTier(request.tier.clone()))?;

    let outcome = state
        .scheduler
        .backfill(&request.symbol, spec.index, request.from, request.to)
        .await?;

    Ok(Json(BackfillResponse {
        symbol: request.symbol,
        tier: request.tier,
        aligned_from: outcome.aligned_from,
        aligned_to: outcome.aligned_to,
        bars_written: outcome.bars_written,
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if is_ready(state.feed.state()) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn build_health_response(state: &AppState) -> HealthResponse {
    let feed_state = state.feed.state();

    let mut symbols = Vec::with_capacity(state.symbols.len());
    for symbol in &state.symbols {
        // A failed staleness read degrades the detail, not the endpoint.
        let tiers = state.monitor.tier_status(symbol).await.unwrap_or_default();
        symbols.push(SymbolStaleness {
            symbol: symbol.clone(),
            tiers,
        });
    }

    HealthResponse {
        status: feed_health(feed_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed: FeedStatus {
            state: feed_state,
            connected: feed_state == ConnectionState::Streaming,
        },
        symbols,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind the listen address.
    #[error("failed to bind {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
