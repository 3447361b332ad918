//! Cascade Scheduler
//!
//! Drives the bottom-up refresh of all tiers on a fixed wall-clock
//! cadence. One cascade run walks the chain tier by tier for each
//! configured symbol; tier *k* is only refreshed after tier *k-1*'s
//! refresh returned successfully in the same pass, so higher-timeframe
//! bars are never computed from stale lower-timeframe data.
//!
//! # Single-flight
//!
//! At most one cascade run is active system-wide. The scheduled trigger
//! and the manual [`CascadeScheduler::run_now`] entrypoint contend for
//! the same `tokio::sync::Mutex` via `try_lock`; a trigger that loses is
//! skipped and logged as a missed cycle; runs never queue or overlap.
//!
//! # Failure containment
//!
//! A tier failure (error or timeout) aborts the remaining upward tiers
//! for that symbol in that pass only. Watermarks already advanced this
//! pass are kept, the failed tier resumes from its prior watermark on
//! the next cadence, and other symbols are unaffected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::ports::{StoreError, TickStore, WatermarkStore};
use crate::application::services::refresh::{RefreshError, RefreshOutcome, TierRefresher};
use crate::domain::market_data::Symbol;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised during cascade runs and backfills.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// A tier refresh returned an error.
    #[error("tier {tier} refresh failed for {symbol}: {source}")]
    RefreshFailure {
        /// Symbol being processed.
        symbol: String,
        /// The failing tier.
        tier: u8,
        /// Underlying refresh error.
        #[source]
        source: RefreshError,
    },

    /// A tier refresh exceeded the configured timeout.
    #[error("tier {tier} refresh timed out for {symbol} after {timeout:?}")]
    RefreshTimeout {
        /// Symbol being processed.
        symbol: String,
        /// The timed-out tier.
        tier: u8,
        /// The configured per-refresh timeout.
        timeout: Duration,
    },

    /// Watermark bookkeeping failed.
    #[error("watermark access failed for {symbol} tier {tier}: {source}")]
    Watermark {
        /// Symbol being processed.
        symbol: String,
        /// Tier whose watermark was touched.
        tier: u8,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Reading the raw tick store failed while sizing the pass.
    #[error("tick store read failed for {symbol}: {source}")]
    TickLookup {
        /// Symbol being processed.
        symbol: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// Another cascade run currently holds the single-flight lock.
    #[error("a cascade run is already in progress")]
    AlreadyRunning,
}

// =============================================================================
// Types
// =============================================================================

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    /// Wall-clock period between scheduled runs.
    pub cadence: Duration,
    /// Period used instead of `cadence` after a run with failures, so a
    /// failed tier can be retried sooner than the steady-state cycle.
    pub retry_cadence: Duration,
    /// Lag subtracted from `now` to form each run's upper bound, keeping
    /// refreshes clear of writes still in flight.
    pub safety_margin: chrono::Duration,
    /// Timeout applied to every individual refresh call.
    pub refresh_timeout: Duration,
    /// Symbols processed by scheduled runs.
    pub symbols: Vec<Symbol>,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(30),
            retry_cadence: Duration::from_secs(30),
            safety_margin: chrono::Duration::seconds(5),
            refresh_timeout: Duration::from_secs(30),
            symbols: Vec::new(),
        }
    }
}

/// Result of one symbol's walk up the chain within a pass.
#[derive(Debug)]
pub enum SymbolOutcome {
    /// Every tier was brought up to date (some possibly no-ops).
    Completed {
        /// Number of tiers whose refresh call actually ran.
        tiers_refreshed: u8,
    },
    /// A tier failed; it and all higher tiers were skipped this pass.
    Aborted {
        /// The tier that failed.
        failed_tier: u8,
        /// What went wrong.
        error: CascadeError,
    },
    /// Shutdown was requested; the walk stopped at a tier boundary.
    Cancelled {
        /// Tiers fully processed before stopping.
        tiers_completed: u8,
    },
    /// The symbol has no stored ticks and no watermarks yet.
    NoData,
}

/// Summary of one cascade run.
#[derive(Debug)]
pub struct CascadeReport {
    /// Unique id for correlating the run's log lines.
    pub run_id: Uuid,
    /// Per-symbol outcomes, in processing order.
    pub outcomes: Vec<(Symbol, SymbolOutcome)>,
}

impl CascadeReport {
    /// Whether any symbol aborted during the run.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, outcome)| matches!(outcome, SymbolOutcome::Aborted { .. }))
    }
}

// =============================================================================
// Cascade Scheduler
// =============================================================================

/// Owns the cadence loop, the single-flight lock, and the watermarks.
pub struct CascadeScheduler {
    config: CascadeConfig,
    refresher: Arc<TierRefresher>,
    tick_store: Arc<dyn TickStore>,
    watermarks: Arc<dyn WatermarkStore>,
    cancel: CancellationToken,
    run_lock: tokio::sync::Mutex<()>,
}

impl CascadeScheduler {
    /// Create a scheduler over the given refresher and stores.
    #[must_use]
    pub fn new(
        config: CascadeConfig,
        refresher: Arc<TierRefresher>,
        tick_store: Arc<dyn TickStore>,
        watermarks: Arc<dyn WatermarkStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            refresher,
            tick_store,
            watermarks,
            cancel,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the cadence loop until shutdown.
    ///
    /// Triggers that fire while a run is active (scheduled or manual)
    /// are skipped and counted as missed cycles; after a run with
    /// failures the next trigger uses `retry_cadence` instead of
    /// `cadence`.
    pub async fn run(self: Arc<Self>) {
        info!(
            cadence_secs = self.config.cadence.as_secs(),
            retry_cadence_secs = self.config.retry_cadence.as_secs(),
            symbols = self.config.symbols.len(),
            "Cascade scheduler started"
        );

        let mut next_trigger = tokio::time::Instant::now() + self.config.cadence;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep_until(next_trigger) => {
                    let delay = match self.try_run_scheduled().await {
                        Some(report) if report.has_failures() => self.config.retry_cadence,
                        _ => self.config.cadence,
                    };

                    // Account for triggers that should have fired while
                    // the run was still executing.
                    next_trigger += delay;
                    let now = tokio::time::Instant::now();
                    let mut missed = 0u32;
                    while next_trigger <= now {
                        next_trigger += self.config.cadence;
                        missed += 1;
                    }
                    if missed > 0 {
                        warn!(missed, "Cascade run overran its cadence, skipping missed cycles");
                        metrics::record_missed_cycles(missed);
                    }
                }
            }
        }

        info!("Cascade scheduler stopped");
    }

    /// Attempt a scheduled run; skips (and records a missed cycle) when
    /// the single-flight lock is held.
    async fn try_run_scheduled(&self) -> Option<CascadeReport> {
        match self.run_lock.try_lock() {
            Ok(_guard) => Some(self.run_locked(&self.config.symbols).await),
            Err(_) => {
                warn!("Cascade trigger skipped, a run is still active");
                metrics::record_missed_cycles(1);
                None
            }
        }
    }

    /// Force a cascade run outside the cadence.
    ///
    /// Contends for the same single-flight lock as scheduled runs.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::AlreadyRunning`] when a run is active.
    pub async fn run_now(&self, symbol: Option<&str>) -> Result<CascadeReport, CascadeError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| CascadeError::AlreadyRunning)?;

        let symbols: Vec<Symbol> = symbol.map_or_else(
            || self.config.symbols.clone(),
            |s| vec![s.to_string()],
        );
        Ok(self.run_locked(&symbols).await)
    }

    /// Repair historical bars for one tier.
    ///
    /// Reuses the idempotent refresh but bypasses the cadence lock and
    /// never touches watermarks, so steady-state progress reporting is
    /// unaffected by history repairs.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::RefreshFailure`] or
    /// [`CascadeError::RefreshTimeout`] when the underlying refresh
    /// fails or exceeds the configured timeout.
    pub async fn backfill(
        &self,
        symbol: &str,
        tier: u8,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RefreshOutcome, CascadeError> {
        info!(symbol = %symbol, tier, from = %from, to = %to, "Backfill requested");
        let started = std::time::Instant::now();
        let label = self
            .refresher
            .chain()
            .get(tier)
            .map_or_else(|| tier.to_string(), |spec| spec.label.clone());

        match tokio::time::timeout(
            self.config.refresh_timeout,
            self.refresher.refresh(tier, symbol, from, to),
        )
        .await
        {
            Ok(Ok(outcome)) => {
                metrics::record_tier_refresh(&label, true, started.elapsed());
                info!(
                    symbol = %symbol,
                    tier,
                    bars = outcome.bars_written,
                    "Backfill completed"
                );
                Ok(outcome)
            }
            Ok(Err(source)) => {
                metrics::record_tier_refresh(&label, false, started.elapsed());
                Err(CascadeError::RefreshFailure {
                    symbol: symbol.to_string(),
                    tier,
                    source,
                })
            }
            Err(_elapsed) => {
                metrics::record_tier_refresh(&label, false, started.elapsed());
                Err(CascadeError::RefreshTimeout {
                    symbol: symbol.to_string(),
                    tier,
                    timeout: self.config.refresh_timeout,
                })
            }
        }
    }

    /// Execute one full pass over `symbols`. Caller must hold the lock.
    async fn run_locked(&self, symbols: &[Symbol]) -> CascadeReport {
        let run_id = Uuid::new_v4();
        let started = std::time::Instant::now();
        debug!(run_id = %run_id, symbols = symbols.len(), "Cascade run started");

        let mut outcomes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if self.cancel.is_cancelled() {
                outcomes.push((symbol.clone(), SymbolOutcome::Cancelled { tiers_completed: 0 }));
                continue;
            }

            let outcome = self.run_symbol(symbol).await;
            match &outcome {
                SymbolOutcome::Completed { tiers_refreshed } => {
                    debug!(
                        run_id = %run_id,
                        symbol = %symbol,
                        tiers_refreshed,
                        "Symbol pass completed"
                    );
                }
                SymbolOutcome::Aborted { failed_tier, error } => {
                    warn!(
                        run_id = %run_id,
                        symbol = %symbol,
                        failed_tier,
                        error = %error,
                        "Symbol pass aborted, higher tiers skipped"
                    );
                    metrics::record_cascade_abort(*failed_tier);
                }
                SymbolOutcome::Cancelled { tiers_completed } => {
                    info!(
                        run_id = %run_id,
                        symbol = %symbol,
                        tiers_completed,
                        "Symbol pass stopped at tier boundary for shutdown"
                    );
                }
                SymbolOutcome::NoData => {
                    debug!(run_id = %run_id, symbol = %symbol, "No ticks yet, nothing to refresh");
                }
            }

            self.record_staleness(symbol).await;
            outcomes.push((symbol.clone(), outcome));
        }

        let report = CascadeReport { run_id, outcomes };
        metrics::record_cascade_run(!report.has_failures(), started.elapsed());
        debug!(
            run_id = %run_id,
            failures = report.has_failures(),
            elapsed_ms = started.elapsed().as_millis(),
            "Cascade run finished"
        );
        report
    }

    /// Walk the chain bottom-up for one symbol.
    async fn run_symbol(&self, symbol: &str) -> SymbolOutcome {
        let safe_to = Utc::now() - self.config.safety_margin;
        // Upper bound the next tier may trust: its source's watermark.
        // For tier 1 that is the safety-margin bound itself.
        let mut source_through = safe_to;
        let mut earliest_cache: Option<Option<DateTime<Utc>>> = None;
        let mut tiers_refreshed: u8 = 0;

        let chain = self.refresher.chain().clone();
        for spec in chain.iter() {
            let tier = spec.index;
            if self.cancel.is_cancelled() {
                return SymbolOutcome::Cancelled {
                    tiers_completed: tier - 1,
                };
            }

            // Resume point: the tier's own watermark, or the earliest
            // stored tick on a cold start.
            let stored = match self.watermarks.get(symbol, tier).await {
                Ok(mark) => mark,
                Err(source) => {
                    return SymbolOutcome::Aborted {
                        failed_tier: tier,
                        error: CascadeError::Watermark {
                            symbol: symbol.to_string(),
                            tier,
                            source,
                        },
                    };
                }
            };
            let from = match stored {
                Some(mark) => mark.through,
                None => {
                    let earliest = match earliest_cache {
                        Some(cached) => cached,
                        None => match self.tick_store.earliest_time(symbol).await {
                            Ok(found) => {
                                earliest_cache = Some(found);
                                found
                            }
                            Err(source) => {
                                return SymbolOutcome::Aborted {
                                    failed_tier: tier,
                                    error: CascadeError::TickLookup {
                                        symbol: symbol.to_string(),
                                        source,
                                    },
                                };
                            }
                        },
                    };
                    match earliest {
                        Some(first_tick) => first_tick,
                        None => return SymbolOutcome::NoData,
                    }
                }
            };

            let to = source_through;
            if from >= to {
                // Source has nothing new; the tier's existing watermark
                // is the bound the next tier may trust.
                source_through = from;
                continue;
            }

            let started = std::time::Instant::now();
            match tokio::time::timeout(
                self.config.refresh_timeout,
                self.refresher.refresh(tier, symbol, from, to),
            )
            .await
            {
                Ok(Ok(outcome)) => {
                    metrics::record_tier_refresh(&spec.label, true, started.elapsed());
                    debug!(
                        symbol = %symbol,
                        tier,
                        label = %spec.label,
                        bars = outcome.bars_written,
                        "Tier refresh succeeded"
                    );
                }
                Ok(Err(source)) => {
                    metrics::record_tier_refresh(&spec.label, false, started.elapsed());
                    return SymbolOutcome::Aborted {
                        failed_tier: tier,
                        error: CascadeError::RefreshFailure {
                            symbol: symbol.to_string(),
                            tier,
                            source,
                        },
                    };
                }
                Err(_elapsed) => {
                    metrics::record_tier_refresh(&spec.label, false, started.elapsed());
                    return SymbolOutcome::Aborted {
                        failed_tier: tier,
                        error: CascadeError::RefreshTimeout {
                            symbol: symbol.to_string(),
                            tier,
                            timeout: self.config.refresh_timeout,
                        },
                    };
                }
            }

            // Only a successful refresh may advance the watermark, and
            // only to the bound it actually covered.
            if let Err(source) = self.watermarks.advance(symbol, tier, to).await {
                return SymbolOutcome::Aborted {
                    failed_tier: tier,
                    error: CascadeError::Watermark {
                        symbol: symbol.to_string(),
                        tier,
                        source,
                    },
                };
            }

            source_through = to;
            tiers_refreshed += 1;
        }

        SymbolOutcome::Completed { tiers_refreshed }
    }

    /// Publish per-tier staleness gauges for one symbol.
    #[allow(clippy::cast_precision_loss)]
    async fn record_staleness(&self, symbol: &str) {
        let Ok(marks) = self.watermarks.all_for_symbol(symbol).await else {
            return;
        };
        let now = Utc::now();
        for mark in marks {
            if let Some(spec) = self.refresher.chain().get(mark.tier) {
                let lag_secs = mark.lag(now).num_milliseconds() as f64 / 1000.0;
                metrics::record_tier_staleness(symbol, &spec.label, lag_secs);
            }
        }
    }
}
