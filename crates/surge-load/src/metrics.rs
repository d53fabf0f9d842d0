//! Run metrics — live counters and queue-wait percentiles.
//!
//! Everything here is fed from the dispatch bridge: each executed batch
//! lands its outcome counts and per-item queue waits, and the emitters keep
//! the queue-depth gauge honest. The same object doubles as the
//! [`MetricsSource`] behind the snapshot cache, closing the feedback loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use surge_core::{BatchResult, MetricsSnapshot};
use surge_signal::{MetricsFuture, MetricsSource};

/// Queue-wait samples kept for percentile estimation. Old samples are
/// overwritten once the ring is full, so percentiles track recent behavior.
const WAIT_SAMPLE_CAPACITY: usize = 4096;

struct WaitRing {
    samples: Vec<u64>,
    cursor: usize,
}

impl WaitRing {
    fn push(&mut self, micros: u64) {
        if self.samples.len() < WAIT_SAMPLE_CAPACITY {
            self.samples.push(micros);
        } else {
            self.samples[self.cursor] = micros;
            self.cursor = (self.cursor + 1) % WAIT_SAMPLE_CAPACITY;
        }
    }
}

struct Inner {
    total_executions: AtomicU64,
    failure_count: AtomicU64,
    queue_depth: AtomicU64,
    waits: Mutex<WaitRing>,
}

/// Shared accumulator for one load run. Cloning is cheap and every clone
/// observes the same counters.
#[derive(Clone)]
pub struct LoadMetrics {
    inner: Arc<Inner>,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                total_executions: AtomicU64::new(0),
                failure_count: AtomicU64::new(0),
                queue_depth: AtomicU64::new(0),
                waits: Mutex::new(WaitRing {
                    samples: Vec::with_capacity(WAIT_SAMPLE_CAPACITY),
                    cursor: 0,
                }),
            }),
        }
    }

    /// Folds one executed batch into the totals.
    pub async fn record_batch(&self, result: &BatchResult, waits: &[Duration]) {
        let executed = result.success_count + result.failure_count;
        self.inner
            .total_executions
            .fetch_add(executed, Ordering::Relaxed);
        self.inner
            .failure_count
            .fetch_add(result.failure_count, Ordering::Relaxed);
        let mut ring = self.inner.waits.lock().await;
        for wait in waits {
            ring.push(wait.as_micros() as u64);
        }
    }

    /// Bumps the queue-depth gauge as writes enter the dispatcher.
    pub fn add_queued(&self, n: u64) {
        self.inner.queue_depth.fetch_add(n, Ordering::Relaxed);
    }

    /// Drops the queue-depth gauge as executed writes leave the dispatcher.
    pub fn remove_queued(&self, n: u64) {
        let inner = &self.inner;
        let mut current = inner.queue_depth.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(n);
            match inner.queue_depth.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn queue_depth(&self) -> u64 {
        self.inner.queue_depth.load(Ordering::Relaxed)
    }

    /// Materializes current totals plus queue-wait percentiles.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let total_executions = self.inner.total_executions.load(Ordering::Relaxed);
        let failure_count = self.inner.failure_count.load(Ordering::Relaxed);
        let success_rate = if total_executions == 0 {
            1.0
        } else {
            1.0 - failure_count as f64 / total_executions as f64
        };

        let mut sorted = {
            let ring = self.inner.waits.lock().await;
            ring.samples.clone()
        };
        sorted.sort_unstable();

        MetricsSnapshot {
            total_executions,
            failure_count,
            success_rate,
            queue_depth: self.queue_depth(),
            queue_wait_p50: percentile(&sorted, 0.50),
            queue_wait_p95: percentile(&sorted, 0.95),
            queue_wait_p99: percentile(&sorted, 0.99),
        }
    }
}

impl Default for LoadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for LoadMetrics {
    fn fetch(&self) -> MetricsFuture {
        let metrics = self.clone();
        Box::pin(async move { Ok(metrics.snapshot().await) })
    }
}

fn percentile(sorted_micros: &[u64], q: f64) -> Duration {
    if sorted_micros.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted_micros.len() as f64 * q) as usize).min(sorted_micros.len() - 1);
    Duration::from_micros(sorted_micros[idx])
}
