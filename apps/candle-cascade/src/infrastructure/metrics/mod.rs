//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: Kraken WebSocket connection state, reconnects, and frame counts
//! - **Ingestion**: Tick throughput, batch flushes, and buffer depth
//! - **Cascade**: Run outcomes, per-tier refresh latency, and staleness
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed counters
    describe_counter!(
        "feed_connections_total",
        "Total WebSocket connection outcomes by result"
    );
    describe_counter!("feed_reconnects_total", "Total feed reconnection attempts");
    describe_counter!("feed_messages_total", "Total feed frames received by kind");
    describe_counter!(
        "feed_parse_errors_total",
        "Total feed frames dropped because they could not be decoded"
    );

    // Feed gauges
    describe_gauge!(
        "feed_connection_state",
        "Current feed connection state (0=disconnected, 1=connecting, 2=streaming, 3=reconnecting)"
    );

    // Ingestion counters
    describe_counter!(
        "ticks_ingested_total",
        "Total ticks accepted from the feed by symbol"
    );
    describe_counter!(
        "ingest_batches_flushed_total",
        "Total tick batch flush attempts by result"
    );
    describe_counter!(
        "ingest_batches_dropped_total",
        "Total tick batches dropped after exhausting flush retries"
    );
    describe_counter!(
        "ingest_ticks_dropped_total",
        "Total ticks lost in dropped batches"
    );

    // Ingestion gauges
    describe_gauge!("ingest_buffer_size", "Ticks currently buffered for flush");

    // Ingestion histograms
    describe_histogram!(
        "ingest_flush_duration_seconds",
        "Time to write one tick batch, including retries"
    );
    describe_histogram!(
        "ingest_batch_size",
        "Ticks per flushed batch; full batches indicate size-triggered flushes"
    );

    // Cascade counters
    describe_counter!("cascade_runs_total", "Total cascade passes by result");
    describe_counter!(
        "cascade_cycles_missed_total",
        "Total scheduled cascade cycles skipped because a pass was still running"
    );
    describe_counter!(
        "cascade_aborts_total",
        "Total symbol passes aborted, labelled by the tier that failed"
    );
    describe_counter!(
        "tier_refreshes_total",
        "Total tier refresh attempts by tier and result"
    );

    // Cascade gauges
    describe_gauge!(
        "tier_staleness_seconds",
        "Seconds between now and the tier watermark, per symbol and tier"
    );

    // Cascade histograms
    describe_histogram!(
        "cascade_run_duration_seconds",
        "Wall time of one full cascade pass over all symbols"
    );
    describe_histogram!(
        "tier_refresh_duration_seconds",
        "Time to recompute one tier window, per tier"
    );
}

// =============================================================================
// Feed Metrics
// =============================================================================

/// Record a WebSocket connection outcome.
pub fn record_feed_connection(established: bool) {
    let result = if established { "established" } else { "error" };
    counter!(
        "feed_connections_total",
        "result" => result
    )
    .increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_feed_reconnect() {
    counter!("feed_reconnects_total").increment(1);
}

/// Record a frame received from the feed.
pub fn record_feed_message(kind: &'static str) {
    counter!(
        "feed_messages_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_feed_parse_error() {
    counter!("feed_parse_errors_total").increment(1);
}

/// Update the feed connection state gauge.
pub fn record_feed_state(state: f64) {
    gauge!("feed_connection_state").set(state);
}

// =============================================================================
// Ingestion Metrics
// =============================================================================

/// Record a tick accepted from the feed.
pub fn record_tick_ingested(symbol: &str) {
    counter!(
        "ticks_ingested_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Update the pending tick buffer gauge.
#[allow(clippy::cast_precision_loss)]
pub fn record_buffer_size(size: usize) {
    gauge!("ingest_buffer_size").set(size as f64);
}

/// Record a batch flush attempt, its size, and its duration.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_flushed(success: bool, size: usize, duration: Duration) {
    let result = if success { "success" } else { "error" };
    counter!(
        "ingest_batches_flushed_total",
        "result" => result
    )
    .increment(1);
    histogram!("ingest_flush_duration_seconds").record(duration.as_secs_f64());
    histogram!("ingest_batch_size").record(size as f64);
}

/// Record a batch dropped after exhausting flush retries.
pub fn record_batch_dropped(size: usize) {
    counter!("ingest_batches_dropped_total").increment(1);
    counter!("ingest_ticks_dropped_total").increment(size as u64);
}

// =============================================================================
// Cascade Metrics
// =============================================================================

/// Record a completed cascade pass and its wall time.
pub fn record_cascade_run(success: bool, duration: Duration) {
    let result = if success { "success" } else { "error" };
    counter!(
        "cascade_runs_total",
        "result" => result
    )
    .increment(1);
    histogram!("cascade_run_duration_seconds").record(duration.as_secs_f64());
}

/// Record scheduled cycles skipped while a pass was still running.
pub fn record_missed_cycles(count: u32) {
    counter!("cascade_cycles_missed_total").increment(u64::from(count));
}

/// Record a symbol pass aborted at `tier`.
pub fn record_cascade_abort(tier: u8) {
    counter!(
        "cascade_aborts_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Record a tier refresh attempt and its duration.
pub fn record_tier_refresh(tier: &str, success: bool, duration: Duration) {
    let result = if success { "success" } else { "error" };
    counter!(
        "tier_refreshes_total",
        "tier" => tier.to_string(),
        "result" => result
    )
    .increment(1);
    histogram!(
        "tier_refresh_duration_seconds",
        "tier" => tier.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Update the watermark staleness gauge for one symbol and tier.
pub fn record_tier_staleness(symbol: &str, tier: &str, lag_secs: f64) {
    gauge!(
        "tier_staleness_seconds",
        "symbol" => symbol.to_string(),
        "tier" => tier.to_string()
    )
    .set(lag_secs);
}
