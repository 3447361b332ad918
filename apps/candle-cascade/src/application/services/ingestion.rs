//! Tick Ingestion
//!
//! Consumes normalized ticks from the feed adapter, batches them by
//! count/time, and flushes each batch as one idempotent upsert into the
//! raw tick store.
//!
//! # Flush policy
//!
//! A batch is flushed when it reaches `max_batch_size` OR when
//! `max_batch_interval` elapses with ticks pending, whichever comes
//! first (defaults 100 ticks / 5s, matching the venue ingesters this
//! service replaces). Failed flushes are retried a bounded number of
//! times with exponential backoff and jitter; after the last attempt the
//! batch is dropped and counted, and ingestion moves on to the next
//! batch.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::TickStore;
use crate::domain::market_data::Tick;
use crate::infrastructure::metrics;

// =============================================================================
// Flush Retry Policy
// =============================================================================

/// Retry policy for failed batch flushes.
#[derive(Debug, Clone)]
pub struct FlushRetryPolicy {
    /// Maximum number of attempts per batch (first try included).
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any backoff delay.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth.
    pub multiplier: f64,
    /// Jitter factor applied to each delay (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for FlushRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl FlushRetryPolicy {
    /// Backoff delay before retry number `retry` (0-based), with jitter.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let base_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(retry as i32);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);

        let jitter_range = capped_ms * self.jitter_factor;
        let min = (capped_ms - jitter_range).max(0.0);
        let max = capped_ms + jitter_range;
        let jittered = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            capped_ms
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(jittered.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

// =============================================================================
// Tick Batcher
// =============================================================================

/// Size-bounded tick accumulator.
///
/// Pure buffering; the flush timer lives in [`IngestionService`].
#[derive(Debug)]
pub struct TickBatcher {
    pending: Vec<Tick>,
    max_size: usize,
}

impl TickBatcher {
    /// Create a batcher that fills at `max_size` ticks.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Add a tick; returns the drained batch when it reaches capacity.
    pub fn push(&mut self, tick: Tick) -> Option<Vec<Tick>> {
        self.pending.push(tick);
        if self.pending.len() >= self.max_size {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Take everything currently buffered.
    pub fn drain(&mut self) -> Vec<Tick> {
        std::mem::take(&mut self.pending)
    }

    /// Number of buffered ticks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// Ingestion Service
// =============================================================================

/// Configuration for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Flush when this many ticks are buffered.
    pub max_batch_size: usize,
    /// Flush pending ticks at least this often.
    pub max_batch_interval: Duration,
    /// Retry policy for failed flushes.
    pub retry: FlushRetryPolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_interval: Duration::from_secs(5),
            retry: FlushRetryPolicy::default(),
        }
    }
}

/// Batches incoming ticks and writes them to the raw tick store.
pub struct IngestionService {
    config: IngestionConfig,
    tick_store: Arc<dyn TickStore>,
}

impl IngestionService {
    /// Create an ingestion service writing to `tick_store`.
    #[must_use]
    pub fn new(config: IngestionConfig, tick_store: Arc<dyn TickStore>) -> Self {
        Self { config, tick_store }
    }

    /// Run the ingestion loop until cancellation or channel close.
    ///
    /// Performs a final flush of any buffered ticks before returning.
    pub async fn run(self, mut ticks: mpsc::Receiver<Tick>, cancel: CancellationToken) {
        let mut batcher = TickBatcher::new(self.config.max_batch_size);
        let mut interval = tokio::time::interval(self.config.max_batch_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick completes immediately; consume it.
        interval.tick().await;

        info!(
            max_batch_size = self.config.max_batch_size,
            max_batch_interval_ms = self.config.max_batch_interval.as_millis(),
            "Ingestion started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Ingestion cancelled, flushing remaining ticks");
                    break;
                }
                _ = interval.tick() => {
                    if !batcher.is_empty() {
                        self.flush(batcher.drain()).await;
                    }
                }
                maybe_tick = ticks.recv() => {
                    match maybe_tick {
                        Some(tick) => {
                            metrics::record_tick_ingested(&tick.symbol);
                            if let Some(full) = batcher.push(tick) {
                                self.flush(full).await;
                                interval.reset();
                            }
                            metrics::record_buffer_size(batcher.len());
                        }
                        None => {
                            debug!("Tick channel closed, flushing remaining ticks");
                            break;
                        }
                    }
                }
            }
        }

        let remaining = batcher.drain();
        if !remaining.is_empty() {
            self.flush(remaining).await;
        }
        info!("Ingestion stopped");
    }

    /// Write one batch, retrying per the policy; drops the batch after
    /// the final failed attempt.
    async fn flush(&self, batch: Vec<Tick>) {
        let size = batch.len();
        let start = std::time::Instant::now();

        for attempt in 1..=self.config.retry.max_attempts {
            match self.tick_store.upsert(&batch).await {
                Ok(()) => {
                    metrics::record_batch_flushed(true, size, start.elapsed());
                    debug!(ticks = size, attempt, "Batch flushed");
                    return;
                }
                Err(err) if attempt < self.config.retry.max_attempts => {
                    let delay = self.config.retry.backoff_for(attempt - 1);
                    warn!(
                        error = %err,
                        attempt,
                        max_attempts = self.config.retry.max_attempts,
                        delay_ms = delay.as_millis(),
                        "Batch flush failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    metrics::record_batch_flushed(false, size, start.elapsed());
                    metrics::record_batch_dropped(size);
                    error!(
                        error = %err,
                        ticks = size,
                        attempts = self.config.retry.max_attempts,
                        "Batch dropped after exhausting flush retries"
                    );
                    return;
                }
            }
        }
    }
}
