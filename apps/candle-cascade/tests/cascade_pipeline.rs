//! Cascade Pipeline Integration Tests
//!
//! Tests the full flow from stored ticks through the bottom-up tier
//! walk: OHLC folding, cross-tier roll-up, refresh ordering, failure
//! containment, idempotence, and watermark staleness.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use candle_cascade::{
    Bar, BarStore, CascadeConfig, CascadeScheduler, InMemoryBarStore, InMemoryTickStore,
    InMemoryWatermarkStore, StalenessMonitor, StoreError, SymbolOutcome, Tick, TickStore,
    TierChain, TierRefresher, WatermarkStore,
};

// =============================================================================
// Store Doubles
// =============================================================================

/// Bar store that records the tier of every replace call.
struct RecordingBarStore {
    inner: InMemoryBarStore,
    replace_tiers: parking_lot::Mutex<Vec<u8>>,
}

impl RecordingBarStore {
    fn new() -> Self {
        Self {
            inner: InMemoryBarStore::new(),
            replace_tiers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn replace_tiers(&self) -> Vec<u8> {
        self.replace_tiers.lock().clone()
    }
}

#[async_trait]
impl BarStore for RecordingBarStore {
    async fn replace_range(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bars: &[Bar],
    ) -> Result<(), StoreError> {
        self.replace_tiers.lock().push(tier);
        self.inner.replace_range(tier, symbol, from, to, bars).await
    }

    async fn query(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        self.inner.query(tier, symbol, from, to).await
    }
}

/// Bar store that rejects writes for one tier a fixed number of times.
struct FlakyBarStore {
    inner: InMemoryBarStore,
    fail_tier: u8,
    failures_left: parking_lot::Mutex<u32>,
    replace_tiers: parking_lot::Mutex<Vec<u8>>,
}

impl FlakyBarStore {
    fn failing(fail_tier: u8, times: u32) -> Self {
        Self {
            inner: InMemoryBarStore::new(),
            fail_tier,
            failures_left: parking_lot::Mutex::new(times),
            replace_tiers: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn replace_tiers(&self) -> Vec<u8> {
        self.replace_tiers.lock().clone()
    }
}

#[async_trait]
impl BarStore for FlakyBarStore {
    async fn replace_range(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bars: &[Bar],
    ) -> Result<(), StoreError> {
        self.replace_tiers.lock().push(tier);
        if tier == self.fail_tier {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::write("injected write failure"));
            }
        }
        self.inner.replace_range(tier, symbol, from, to, bars).await
    }

    async fn query(
        &self,
        tier: u8,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        self.inner.query(tier, symbol, from, to).await
    }
}

/// Tick store that stalls every range query for a fixed duration.
///
/// Records when each query began and how many queries were in flight at
/// once, so tests can pin down the scheduler's overrun handling.
struct StallingTickStore {
    inner: InMemoryTickStore,
    stall: Duration,
    query_starts: parking_lot::Mutex<Vec<tokio::time::Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StallingTickStore {
    fn new(stall: Duration) -> Self {
        Self {
            inner: InMemoryTickStore::new(),
            stall,
            query_starts: parking_lot::Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn query_starts(&self) -> Vec<tokio::time::Instant> {
        self.query_starts.lock().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TickStore for StallingTickStore {
    async fn upsert(&self, ticks: &[Tick]) -> Result<(), StoreError> {
        self.inner.upsert(ticks).await
    }

    async fn query(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, StoreError> {
        self.query_starts.lock().push(tokio::time::Instant::now());
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
        tokio::time::sleep(self.stall).await;
        let result = self.inner.query(symbol, from, to).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn earliest_time(&self, symbol: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.earliest_time(symbol).await
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Pipeline {
    scheduler: Arc<CascadeScheduler>,
    monitor: StalenessMonitor,
    ticks: Arc<InMemoryTickStore>,
    bars: Arc<dyn BarStore>,
    watermarks: Arc<InMemoryWatermarkStore>,
    cancel: CancellationToken,
}

fn pipeline_with(bars: Arc<dyn BarStore>, cadence: Duration) -> Pipeline {
    let chain = TierChain::standard();
    let ticks = Arc::new(InMemoryTickStore::new());
    let watermarks = Arc::new(InMemoryWatermarkStore::new());

    let refresher = Arc::new(TierRefresher::new(
        chain.clone(),
        Arc::clone(&ticks) as Arc<dyn TickStore>,
        Arc::clone(&bars),
    ));
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(CascadeScheduler::new(
        CascadeConfig {
            cadence,
            retry_cadence: cadence,
            symbols: vec!["BTCUSD".to_string()],
            ..CascadeConfig::default()
        },
        refresher,
        Arc::clone(&ticks) as Arc<dyn TickStore>,
        Arc::clone(&watermarks) as Arc<dyn WatermarkStore>,
        cancel.clone(),
    ));
    let monitor = StalenessMonitor::new(
        chain,
        Arc::clone(&watermarks) as Arc<dyn WatermarkStore>,
    );

    Pipeline {
        scheduler,
        monitor,
        ticks,
        bars,
        watermarks,
        cancel,
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(Arc::new(InMemoryBarStore::new()), Duration::from_secs(30))
}

/// Scheduler wired to a [`StallingTickStore`], for contention tests.
fn stalling_pipeline(
    stall: Duration,
    cadence: Duration,
) -> (Arc<CascadeScheduler>, Arc<StallingTickStore>, CancellationToken) {
    let chain = TierChain::standard();
    let ticks = Arc::new(StallingTickStore::new(stall));
    let bars = Arc::new(InMemoryBarStore::new());
    let watermarks = Arc::new(InMemoryWatermarkStore::new());

    let refresher = Arc::new(TierRefresher::new(
        chain,
        Arc::clone(&ticks) as Arc<dyn TickStore>,
        bars as Arc<dyn BarStore>,
    ));
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(CascadeScheduler::new(
        CascadeConfig {
            cadence,
            retry_cadence: cadence,
            // Must exceed the longest stall or the pass aborts on timeout.
            refresh_timeout: Duration::from_secs(120),
            symbols: vec!["BTCUSD".to_string()],
            ..CascadeConfig::default()
        },
        refresher,
        Arc::clone(&ticks) as Arc<dyn TickStore>,
        watermarks as Arc<dyn WatermarkStore>,
        cancel.clone(),
    ));
    (scheduler, ticks, cancel)
}

/// A recent 12h-bucket boundary at least 90 minutes in the past.
///
/// Aligned for every tier in the chain, so seeded offsets land in
/// deterministic buckets, and old enough that seeded ticks always fall
/// inside the scheduler's safety margin.
fn aligned_base() -> DateTime<Utc> {
    let chain = TierChain::standard();
    let twelve_hour = chain.get(6).unwrap().clone();
    twelve_hour.align_down(Utc::now() - chrono::Duration::minutes(90))
}

fn tick_at(base: DateTime<Utc>, secs: i64, bid: i64) -> Tick {
    Tick::new(
        "BTCUSD".to_string(),
        base + chrono::Duration::seconds(secs),
        Decimal::from(bid),
        Decimal::from(bid + 1),
    )
}

async fn seed(ticks: &InMemoryTickStore, base: DateTime<Utc>, quotes: &[(i64, i64)]) {
    let batch: Vec<Tick> = quotes
        .iter()
        .map(|&(secs, bid)| tick_at(base, secs, bid))
        .collect();
    ticks.upsert(&batch).await.unwrap();
}

// =============================================================================
// OHLC Folding
// =============================================================================

#[tokio::test]
async fn test_minute_bar_matches_quote_history() {
    let pipe = pipeline();
    let base = aligned_base();
    seed(&pipe.ticks, base, &[(0, 100), (30, 105), (59, 98)]).await;

    pipe.scheduler.run_now(None).await.unwrap();

    let bars = pipe
        .bars
        .query(1, "BTCUSD", base, base + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(bars.len(), 1);

    let bar = &bars[0];
    assert_eq!(bar.time, base);
    assert_eq!(bar.open, Decimal::from(100));
    assert_eq!(bar.high, Decimal::from(105));
    assert_eq!(bar.low, Decimal::from(98));
    assert_eq!(bar.close, Decimal::from(98));
    assert_eq!(bar.tick_count, 3);
}

#[tokio::test]
async fn test_five_minute_bar_rolls_up_minute_bars() {
    let pipe = pipeline();
    let base = aligned_base();
    // Three occupied minutes inside one 5m bucket; minute 3 is empty.
    seed(
        &pipe.ticks,
        base,
        &[
            (0, 100),
            (30, 107),
            (59, 98),
            (65, 101),
            (110, 96),
            (250, 99),
            (290, 103),
        ],
    )
    .await;

    pipe.scheduler.run_now(None).await.unwrap();

    let window_end = base + chrono::Duration::minutes(5);
    let minute_bars = pipe.bars.query(1, "BTCUSD", base, window_end).await.unwrap();
    assert_eq!(minute_bars.len(), 3);

    let five_minute = pipe.bars.query(2, "BTCUSD", base, window_end).await.unwrap();
    assert_eq!(five_minute.len(), 1);

    let bar = &five_minute[0];
    assert_eq!(bar.time, base);
    assert_eq!(bar.open, minute_bars[0].open);
    assert_eq!(bar.close, minute_bars[2].close);
    assert_eq!(bar.high, Decimal::from(107));
    assert_eq!(bar.low, Decimal::from(96));
    assert_eq!(bar.tick_count, 7);

    // The whole history collapses into a single top-tier bar.
    let top = pipe
        .bars
        .query(6, "BTCUSD", base, base + chrono::Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].tick_count, 7);
}

// =============================================================================
// Refresh Ordering
// =============================================================================

#[tokio::test]
async fn test_refresh_order_is_strictly_bottom_up() {
    let recording = Arc::new(RecordingBarStore::new());
    let pipe = pipeline_with(
        Arc::clone(&recording) as Arc<dyn BarStore>,
        Duration::from_secs(30),
    );
    let base = aligned_base();
    seed(&pipe.ticks, base, &[(0, 100), (30, 102)]).await;

    pipe.scheduler.run_now(None).await.unwrap();
    pipe.scheduler.run_now(None).await.unwrap();

    let tiers = recording.replace_tiers();
    assert_eq!(tiers, vec![1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6]);
}

// =============================================================================
// Failure Containment
// =============================================================================

#[tokio::test]
async fn test_tier_failure_contains_damage_and_heals() {
    let flaky = Arc::new(FlakyBarStore::failing(2, 1));
    let pipe = pipeline_with(
        Arc::clone(&flaky) as Arc<dyn BarStore>,
        Duration::from_secs(30),
    );
    let base = aligned_base();
    seed(&pipe.ticks, base, &[(0, 100), (30, 105), (59, 98)]).await;

    let report = pipe.scheduler.run_now(None).await.unwrap();
    assert!(matches!(
        report.outcomes[0].1,
        SymbolOutcome::Aborted { failed_tier: 2, .. }
    ));

    // Tier 1 kept its progress; the failed tier and everything above
    // were never reached.
    assert!(pipe.watermarks.get("BTCUSD", 1).await.unwrap().is_some());
    assert!(pipe.watermarks.get("BTCUSD", 2).await.unwrap().is_none());
    assert!(pipe.watermarks.get("BTCUSD", 3).await.unwrap().is_none());
    assert_eq!(flaky.replace_tiers(), vec![1, 2]);

    // The next pass picks up from the stored watermarks and completes.
    let report = pipe.scheduler.run_now(None).await.unwrap();
    assert!(matches!(
        report.outcomes[0].1,
        SymbolOutcome::Completed { .. }
    ));

    let statuses = pipe.monitor.tier_status("BTCUSD").await.unwrap();
    assert!(statuses.iter().all(|s| s.watermark.is_some()));
    let top = pipe
        .bars
        .query(6, "BTCUSD", base, base + chrono::Duration::hours(12))
        .await
        .unwrap();
    assert_eq!(top.len(), 1);
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_repeated_runs_leave_every_tier_unchanged() {
    let pipe = pipeline();
    let base = aligned_base();
    seed(
        &pipe.ticks,
        base,
        &[(0, 100), (30, 105), (59, 98), (70, 101), (260, 99)],
    )
    .await;

    pipe.scheduler.run_now(None).await.unwrap();
    let window_end = base + chrono::Duration::hours(12);
    let mut first_pass = Vec::new();
    for tier in 1..=6u8 {
        first_pass.push(pipe.bars.query(tier, "BTCUSD", base, window_end).await.unwrap());
    }

    pipe.scheduler.run_now(None).await.unwrap();
    for (tier, previous) in (1..=6u8).zip(&first_pass) {
        let current = pipe.bars.query(tier, "BTCUSD", base, window_end).await.unwrap();
        assert_eq!(&current, previous, "tier {tier} changed without new ticks");
        assert!(!current.is_empty(), "tier {tier} lost its bars");
    }
}

// =============================================================================
// Backfill
// =============================================================================

#[tokio::test]
async fn test_backfill_rebuilds_history_without_touching_watermarks() {
    let pipe = pipeline();
    let base = aligned_base();
    seed(&pipe.ticks, base, &[(0, 100), (30, 105), (59, 98)]).await;

    let outcome = pipe
        .scheduler
        .backfill("BTCUSD", 1, base, base + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(outcome.bars_written, 1);

    let bars = pipe
        .bars
        .query(1, "BTCUSD", base, base + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].close, Decimal::from(98));

    // History repair reports nothing as "refreshed".
    let statuses = pipe.monitor.tier_status("BTCUSD").await.unwrap();
    assert!(statuses.iter().all(|s| s.watermark.is_none()));
}

// =============================================================================
// Scheduled Cadence and Staleness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduled_cadence_keeps_every_tier_fresh() {
    let pipe = pipeline_with(Arc::new(InMemoryBarStore::new()), Duration::from_secs(30));
    let base = aligned_base();
    seed(&pipe.ticks, base, &[(0, 100), (30, 105), (59, 98)]).await;

    let scheduler = Arc::clone(&pipe.scheduler);
    let runner = tokio::spawn(scheduler.run());

    // Three cadence triggers under paused time.
    tokio::time::sleep(Duration::from_secs(95)).await;
    pipe.cancel.cancel();
    runner.await.unwrap();

    let statuses = pipe.monitor.tier_status("BTCUSD").await.unwrap();
    assert_eq!(statuses.len(), 6);
    for status in &statuses {
        let lag = status.lag_seconds.expect("tier never refreshed");
        assert!(
            lag < 10.0,
            "tier {} lag {lag}s exceeds the cadence bound",
            status.label
        );
    }

    // Every pass pins all tiers to the same upper bound.
    let first = statuses[0].watermark.unwrap();
    assert!(statuses.iter().all(|s| s.watermark.unwrap() == first));
}

// =============================================================================
// Scheduler Contention
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_overrunning_pass_skips_missed_cycles() {
    // Each pass stalls 70s against a 30s cadence, so every pass overruns
    // two triggers.
    let (scheduler, ticks, cancel) = stalling_pipeline(
        Duration::from_secs(70),
        Duration::from_secs(30),
    );
    seed(&ticks.inner, aligned_base(), &[(0, 100), (30, 105), (59, 98)]).await;

    let start = tokio::time::Instant::now();
    let runner = tokio::spawn(Arc::clone(&scheduler).run());

    tokio::time::sleep(Duration::from_secs(200)).await;
    cancel.cancel();
    runner.await.unwrap();

    // First pass runs 30s..100s, overrunning the 60s and 90s triggers.
    // Those cycles must be dropped, not queued, putting the second pass
    // on the 120s grid line.
    let starts = ticks.query_starts();
    assert_eq!(starts.len(), 2, "expected exactly two passes, got {starts:?}");
    let first = starts[0] - start;
    assert!(
        first >= Duration::from_secs(30) && first < Duration::from_secs(31),
        "first pass started at {first:?}, not on the cadence"
    );
    let gap = starts[1] - starts[0];
    assert!(
        gap >= Duration::from_secs(90) && gap < Duration::from_secs(91),
        "pass gap {gap:?} is not three cadences"
    );
    assert_eq!(ticks.max_in_flight(), 1, "cascade passes overlapped");
}

#[tokio::test(start_paused = true)]
async fn test_manual_run_defers_the_scheduled_cycle() {
    let (scheduler, ticks, cancel) = stalling_pipeline(
        Duration::from_secs(50),
        Duration::from_secs(30),
    );
    seed(&ticks.inner, aligned_base(), &[(0, 100), (30, 105), (59, 98)]).await;

    let start = tokio::time::Instant::now();
    let runner = tokio::spawn(Arc::clone(&scheduler).run());

    // Manual run at 5s holds the run lock until 55s, across the 30s
    // trigger.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let manual = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run_now(None).await }
    });

    tokio::time::sleep(Duration::from_secs(110)).await;
    cancel.cancel();
    runner.await.unwrap();

    let report = manual.await.unwrap().unwrap();
    assert!(matches!(
        report.outcomes[0].1,
        SymbolOutcome::Completed { .. }
    ));

    // The busy 30s trigger is skipped outright and the scheduler resumes
    // on the 60s grid line.
    let starts = ticks.query_starts();
    assert_eq!(starts.len(), 2, "expected exactly two passes, got {starts:?}");
    let first = starts[0] - start;
    assert!(
        first >= Duration::from_secs(5) && first < Duration::from_secs(6),
        "manual pass started at {first:?}"
    );
    let second = starts[1] - start;
    assert!(
        second >= Duration::from_secs(60) && second < Duration::from_secs(61),
        "scheduled pass started at {second:?}, busy cycle was not skipped"
    );
    assert_eq!(ticks.max_in_flight(), 1, "cascade passes overlapped");
}
