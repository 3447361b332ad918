//! Candle Cascade Binary
//!
//! Starts the tick ingestion and bar aggregation service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin candle-cascade
//! ```
//!
//! # Environment Variables
//!
//! All optional; see `infrastructure::config` for defaults.
//!
//! - `FEED_PAIRS`: Venue pairs and canonical symbols, e.g. `XBT/USD:BTCUSD`
//! - `FEED_URL`: Venue WebSocket URL (default: wss://ws.kraken.com)
//! - `CASCADE_CADENCE_SECONDS`: Period between cascade runs (default: 30)
//! - `CASCADE_RETRY_CADENCE_SECONDS`: Period after a failed run (default: cadence)
//! - `SAFETY_MARGIN_SECONDS`: Refresh upper-bound lag behind now (default: 5)
//! - `REFRESH_TIMEOUT_SECONDS`: Per-tier refresh timeout (default: 30)
//! - `MAX_BATCH_SIZE`: Ticks per ingestion batch (default: 100)
//! - `MAX_BATCH_INTERVAL_SECONDS`: Max time ticks wait in the buffer (default: 5)
//! - `FLUSH_RETRY_ATTEMPTS`: Write attempts per batch (default: 3)
//! - `BACKOFF_INITIAL_MS` / `BACKOFF_MAX_MS`: Feed reconnect backoff (default: 5000/60000)
//! - `FEED_IDLE_TIMEOUT_SECONDS`: Recycle a silent connection (default: 30)
//! - `HTTP_BIND_ADDR`: API and metrics bind address (default: 0.0.0.0:8080)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: candle-cascade)
//! - `RUST_LOG`: Log filter (default: info,candle_cascade=debug)

use std::sync::Arc;
use std::time::Duration;

use candle_cascade::infrastructure::telemetry;
use candle_cascade::{
    ApiServer, AppState, BarStore, CascadeConfig, CascadeScheduler, Config, FeedEvent,
    FlushRetryPolicy, IngestionConfig, IngestionService, InMemoryBarStore, InMemoryTickStore,
    InMemoryWatermarkStore, KrakenClient, KrakenClientConfig, ReconnectConfig, StalenessMonitor,
    Tick, TickStore, TierChain, TierRefresher, WatermarkStore, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Candle Cascade");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = Config::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Storage adapters behind the ports
    let tick_store: Arc<dyn TickStore> = Arc::new(InMemoryTickStore::new());
    let bar_store: Arc<dyn BarStore> = Arc::new(InMemoryBarStore::new());
    let watermark_store: Arc<dyn WatermarkStore> = Arc::new(InMemoryWatermarkStore::new());

    let chain = TierChain::standard();

    // Refresher and cascade scheduler
    let refresher = Arc::new(TierRefresher::new(
        chain.clone(),
        Arc::clone(&tick_store),
        Arc::clone(&bar_store),
    ));
    let cascade_config = CascadeConfig {
        cadence: config.cascade.cadence,
        retry_cadence: config.cascade.retry_cadence,
        safety_margin: chrono::Duration::from_std(config.cascade.safety_margin)?,
        refresh_timeout: config.cascade.refresh_timeout,
        symbols: config.symbols(),
    };
    let scheduler = Arc::new(CascadeScheduler::new(
        cascade_config,
        refresher,
        Arc::clone(&tick_store),
        Arc::clone(&watermark_store),
        shutdown_token.clone(),
    ));

    // Staleness monitor for the tiers endpoint and health detail
    let monitor = Arc::new(StalenessMonitor::new(
        chain.clone(),
        Arc::clone(&watermark_store),
    ));

    // Feed client
    let feed_config = KrakenClientConfig {
        url: config.feed.url.clone(),
        pairs: config.feed.pairs.clone(),
        reconnect: ReconnectConfig {
            initial_delay: config.feed.backoff_initial,
            max_delay: config.feed.backoff_max,
            ..ReconnectConfig::default()
        },
        idle_timeout: config.feed.idle_timeout,
    };

    // Event channels: feed -> handler -> ingestion
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(1024);
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(1024);

    let feed_client = Arc::new(KrakenClient::new(
        feed_config,
        feed_tx,
        shutdown_token.clone(),
    ));

    // API server
    let app_state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        chain,
        Arc::clone(&scheduler),
        Arc::clone(&bar_store),
        monitor,
        Arc::clone(&feed_client),
        config.symbols(),
    ));
    let api_server = ApiServer::new(
        config.server.http_bind_addr.clone(),
        app_state,
        shutdown_token.clone(),
    );

    // Ingestion service
    let ingestion_config = IngestionConfig {
        max_batch_size: config.ingestion.max_batch_size,
        max_batch_interval: config.ingestion.max_batch_interval,
        retry: FlushRetryPolicy {
            max_attempts: config.ingestion.flush_retry_attempts,
            ..FlushRetryPolicy::default()
        },
    };
    let ingestion = IngestionService::new(ingestion_config, Arc::clone(&tick_store));

    // Spawn feed event handler
    tokio::spawn(async move {
        handle_feed_events(feed_rx, tick_tx).await;
    });

    // Spawn ingestion loop; its handle is awaited on shutdown so the
    // final flush completes before the process exits
    let ingestion_cancel = shutdown_token.clone();
    let ingestion_handle = tokio::spawn(async move {
        ingestion.run(tick_rx, ingestion_cancel).await;
    });

    // Spawn feed client
    let feed_client_clone = Arc::clone(&feed_client);
    tokio::spawn(async move {
        if let Err(e) = feed_client_clone.run().await {
            tracing::error!(error = %e, "Feed client error");
        }
    });

    // Spawn cascade scheduler
    let scheduler_clone = Arc::clone(&scheduler);
    let scheduler_handle = tokio::spawn(async move {
        scheduler_clone.run().await;
    });

    // Spawn API server
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Candle cascade ready");

    await_shutdown(shutdown_token).await;

    // Give the ingestion loop time to flush its final batch and the
    // scheduler time to finish the pass in flight
    let drain = async {
        let _ = ingestion_handle.await;
        let _ = scheduler_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Workers did not drain within the shutdown timeout"
        );
    }

    tracing::info!("Candle cascade stopped");
    Ok(())
}

/// Forward feed events: ticks into the ingestion channel, lifecycle
/// changes into the log.
async fn handle_feed_events(mut rx: mpsc::Receiver<FeedEvent>, tick_tx: mpsc::Sender<Tick>) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Connected => {
                tracing::info!("Feed connected");
            }
            FeedEvent::Disconnected => {
                tracing::warn!("Feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Feed reconnecting");
            }
            FeedEvent::Subscribed { pair } => {
                tracing::info!(pair = %pair, "Pair subscription confirmed");
            }
            FeedEvent::Tick(tick) => {
                if tick_tx.send(tick).await.is_err() {
                    tracing::warn!("Tick channel closed, stopping feed event handler");
                    return;
                }
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        cadence_secs = config.cascade.cadence.as_secs(),
        retry_cadence_secs = config.cascade.retry_cadence.as_secs(),
        safety_margin_secs = config.cascade.safety_margin.as_secs(),
        refresh_timeout_secs = config.cascade.refresh_timeout.as_secs(),
        max_batch_size = config.ingestion.max_batch_size,
        symbols = ?config.symbols(),
        http_bind_addr = %config.server.http_bind_addr,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed.url,
        backoff_initial_ms = config.feed.backoff_initial.as_millis(),
        backoff_max_ms = config.feed.backoff_max.as_millis(),
        idle_timeout_secs = config.feed.idle_timeout.as_secs(),
        "Feed endpoint"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
