//! Time-bounded cache around the metrics source.
//!
//! The control tick and every emitter poll metrics; the underlying read
//! sorts wait samples and is too expensive to run per poll. One snapshot
//! is cached together with its fetch time, and a double-checked refresh
//! makes sure concurrent stale readers trigger exactly one fetch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use surge_core::MetricsSnapshot;

use crate::source::MetricsSource;

struct Slot {
    snapshot: Option<MetricsSnapshot>,
    /// Time of the last fetch attempt, successful or not.
    fetched_at: Option<Instant>,
}

/// Caches the latest [`MetricsSnapshot`] for a configurable TTL.
///
/// A fetch failure keeps the previous snapshot and still stamps the
/// attempt, so a dead source is retried at most once per TTL instead of
/// on every poll.
pub struct MetricsCache {
    source: Arc<dyn MetricsSource>,
    ttl: Duration,
    slot: RwLock<Slot>,
}

impl MetricsCache {
    pub fn new(source: Arc<dyn MetricsSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            slot: RwLock::new(Slot {
                snapshot: None,
                fetched_at: None,
            }),
        }
    }

    /// Current snapshot, refreshed if the cached one is older than the
    /// TTL. `None` only before the first successful fetch.
    pub async fn get(&self) -> Option<MetricsSnapshot> {
        {
            let slot = self.slot.read().await;
            if let Some(at) = slot.fetched_at
                && at.elapsed() < self.ttl
            {
                return slot.snapshot.clone();
            }
        }

        let mut slot = self.slot.write().await;
        // Another caller may have refreshed while we waited for the
        // write lock; re-check before fetching.
        if let Some(at) = slot.fetched_at
            && at.elapsed() < self.ttl
        {
            return slot.snapshot.clone();
        }

        match self.source.fetch().await {
            Ok(snapshot) => {
                slot.snapshot = Some(snapshot.clone());
                slot.fetched_at = Some(Instant::now());
                Some(snapshot)
            }
            Err(e) => {
                debug!(error = %e, "metrics fetch failed, keeping last snapshot");
                slot.fetched_at = Some(Instant::now());
                slot.snapshot.clone()
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignalError;
    use crate::source::MetricsFuture;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Source that numbers its fetches so distinct fetches yield
    /// distinct snapshots, and can be told to start failing.
    struct CountingSource {
        fetches: AtomicU64,
        fail_from: u64,
        delay: Duration,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicU64::new(0),
                fail_from: u64::MAX,
                delay: Duration::ZERO,
            })
        }

        fn failing_from(n: u64) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicU64::new(0),
                fail_from: n,
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicU64::new(0),
                fail_from: u64::MAX,
                delay,
            })
        }

        fn fetch_count(&self) -> u64 {
            self.fetches.load(Ordering::Relaxed)
        }
    }

    impl MetricsSource for CountingSource {
        fn fetch(&self) -> MetricsFuture {
            let n = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
            let fail = n >= self.fail_from;
            let delay = self.delay;
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if fail {
                    return Err(SignalError::MetricsUnavailable(format!(
                        "fetch {n} refused"
                    )));
                }
                Ok(MetricsSnapshot {
                    total_executions: n,
                    ..MetricsSnapshot::default()
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_gets_within_ttl_fetch_once() {
        let source = CountingSource::new();
        let cache = MetricsCache::new(source.clone(), Duration::from_millis(100));

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_after_ttl() {
        let source = CountingSource::new();
        let cache = MetricsCache::new(source.clone(), Duration::from_millis(100));

        let first = cache.get().await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        let second = cache.get().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_serves_last_snapshot() {
        let source = CountingSource::failing_from(2);
        let cache = MetricsCache::new(source.clone(), Duration::from_millis(100));

        let first = cache.get().await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        // Refresh fails; the stale snapshot is still served.
        let second = cache.get().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 2);

        // The failed attempt was stamped, so an immediate re-get does
        // not hit the source again.
        let _ = cache.get().await;
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cache_with_failing_source_returns_none() {
        let source = CountingSource::failing_from(1);
        let cache = MetricsCache::new(source.clone(), Duration::from_millis(100));

        assert!(cache.get().await.is_none());
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stale_readers_trigger_one_fetch() {
        let source = CountingSource::slow(Duration::from_millis(10));
        let cache = Arc::new(MetricsCache::new(source.clone(), Duration::from_millis(100)));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.get().await }));
        }

        let mut snapshots = Vec::new();
        for task in tasks {
            snapshots.push(task.await.unwrap().unwrap());
        }

        assert_eq!(source.fetch_count(), 1);
        assert!(snapshots.windows(2).all(|w| w[0] == w[1]));
    }
}
