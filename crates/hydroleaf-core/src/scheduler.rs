//! Background flush scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hydroleaf_types::{from_unix_millis, to_unix_millis};

use crate::accumulator::{Accumulator, FlushOutcome};
use crate::error::Result;

/// Counters shared between the flush task and status readers.
#[derive(Debug, Default)]
pub struct FlushStats {
    flushes: AtomicU64,
    rollups_written: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
    /// Unix millis of the last successful flush, 0 if none.
    last_flush_ms: AtomicI64,
}

/// Point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushStatsSnapshot {
    pub flushes: u64,
    pub rollups_written: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_flush: Option<OffsetDateTime>,
}

impl FlushStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, outcome: FlushOutcome) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.rollups_written
            .fetch_add(outcome.written as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_flush_ms
            .store(to_unix_millis(OffsetDateTime::now_utc()), Ordering::Relaxed);
    }

    /// Returns the new consecutive failure count.
    fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> FlushStatsSnapshot {
        let last = self.last_flush_ms.load(Ordering::Relaxed);
        FlushStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            rollups_written: self.rollups_written.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_flush: (last != 0).then(|| from_unix_millis(last).ok()).flatten(),
        }
    }
}

/// Runs [`Accumulator::flush`] on a fixed period until shut down.
pub struct FlushScheduler {
    accumulator: Arc<Accumulator>,
    stats: Arc<FlushStats>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Default flush period.
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

    /// Spawn the flush task. The first flush happens one period from now.
    pub fn start(accumulator: Arc<Accumulator>, period: Duration) -> Self {
        Self::start_with_stats(accumulator, period, Arc::new(FlushStats::new()))
    }

    /// Spawn the flush task, recording into existing stats.
    pub fn start_with_stats(
        accumulator: Arc<Accumulator>,
        period: Duration,
        stats: Arc<FlushStats>,
    ) -> Self {
        let cancel = CancellationToken::new();

        info!("Starting flush scheduler (period: {:?})", period);

        let handle = tokio::spawn(run(
            Arc::clone(&accumulator),
            period,
            Arc::clone(&stats),
            cancel.clone(),
        ));

        Self {
            accumulator,
            stats,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn stats(&self) -> Arc<FlushStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the task and run one final flush.
    pub async fn shutdown(mut self) -> Result<FlushOutcome> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Flush task ended abnormally: {}", e);
            }
        }

        info!("Running final flush");
        flush_once(&self.accumulator, &self.stats).await
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    accumulator: Arc<Accumulator>,
    period: Duration,
    stats: Arc<FlushStats>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Flush scheduler cancelled");
                break;
            }
            _ = ticker.tick() => {
                // Errors are logged and counted; the entries stay buffered.
                let _ = flush_once(&accumulator, &stats).await;
            }
        }
    }
}

async fn flush_once(accumulator: &Accumulator, stats: &FlushStats) -> Result<FlushOutcome> {
    match accumulator.flush().await {
        Ok(outcome) => {
            stats.record_success(outcome);
            if outcome.written > 0 {
                debug!(
                    "Flush drained {} entries, wrote {} rollups",
                    outcome.drained, outcome.written
                );
            }
            Ok(outcome)
        }
        Err(e) => {
            let failures = stats.record_failure();
            if failures <= 3 {
                warn!("Flush failed: {} (attempt {})", e, failures);
            } else if failures == 4 {
                error!(
                    "Flush failed {} times in a row, will keep retrying silently",
                    failures
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;
    use time::macros::datetime;

    fn setup() -> (Arc<MemoryStore>, Arc<Accumulator>) {
        let store = Arc::new(MemoryStore::new());
        let acc = Arc::new(Accumulator::new(store.clone()));
        (store, acc)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_every_period() {
        let (store, acc) = setup();
        let scheduler = FlushScheduler::start(Arc::clone(&acc), Duration::from_secs(60));

        acc.add("S01-L01-A1", "ph", 6.0, datetime!(2024-01-01 00:00 UTC));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.rollups().await.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.rollups().await.len(), 1);
        assert_eq!(scheduler.stats().snapshot().rollups_written, 1);
        assert!(scheduler.stats().snapshot().last_flush.is_some());

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_runs_final_flush() {
        let (store, acc) = setup();
        let scheduler = FlushScheduler::start(Arc::clone(&acc), Duration::from_secs(3600));

        acc.add("S01-L01-A1", "ph", 6.0, datetime!(2024-01-01 00:00 UTC));
        acc.add("S01-L01-A1", "ec", 1.2, datetime!(2024-01-01 00:00 UTC));

        let outcome = scheduler.shutdown().await.unwrap();
        assert_eq!(outcome.written, 2);
        assert_eq!(store.rollups().await.len(), 2);
        assert_eq!(acc.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_and_retried() {
        let (store, acc) = setup();
        store.fail_rollup_writes(2);
        let scheduler = FlushScheduler::start(Arc::clone(&acc), Duration::from_secs(10));

        acc.add("S01-L01-A1", "ph", 6.0, datetime!(2024-01-01 00:00 UTC));

        tokio::time::sleep(Duration::from_secs(21)).await;
        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.consecutive_failures, 2);
        assert!(store.rollups().await.is_empty());
        assert_eq!(acc.pending(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(store.rollups().await.len(), 1);

        scheduler.shutdown().await.unwrap();
    }

    #[test]
    fn test_stats_snapshot_default() {
        let snapshot = FlushStats::new().snapshot();
        assert_eq!(snapshot.flushes, 0);
        assert_eq!(snapshot.last_flush, None);
    }
}
