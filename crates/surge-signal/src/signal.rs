//! Backpressure signals and their composition.
//!
//! Each signal projects one resource into a score in [0, 1]: 0 means no
//! pressure, 1 means saturated. The composite takes the maximum across
//! signals, never an average; a single saturated resource is the
//! bottleneck and must dominate even while everything else idles.

use std::sync::Arc;

use tracing::debug;

use surge_core::PoolSnapshot;

use crate::cache::MetricsCache;
use crate::source::PoolSource;

/// Boxed future returned by [`BackpressureSignal::score`].
pub type ScoreFuture = std::pin::Pin<Box<dyn std::future::Future<Output = f64> + Send>>;

/// One normalized pressure reading.
///
/// `score` is a read-only projection over the current snapshots; no
/// signal keeps trend state of its own. A source that cannot be read
/// scores 0.0, so missing telemetry is never treated as pressure.
pub trait BackpressureSignal: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self) -> ScoreFuture;
}

// ── Queue ─────────────────────────────────────────────────────────

/// Pressure from pending-queue depth relative to capacity.
pub struct QueueSignal {
    cache: Arc<MetricsCache>,
    capacity: u64,
}

impl QueueSignal {
    pub fn new(cache: Arc<MetricsCache>, capacity: u64) -> Self {
        Self { cache, capacity }
    }
}

impl BackpressureSignal for QueueSignal {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn score(&self) -> ScoreFuture {
        let cache = Arc::clone(&self.cache);
        let capacity = self.capacity;
        Box::pin(async move {
            if capacity == 0 {
                return 0.0;
            }
            match cache.get().await {
                Some(snapshot) => (snapshot.queue_depth as f64 / capacity as f64).min(1.0),
                None => 0.0,
            }
        })
    }
}

// ── Pool ──────────────────────────────────────────────────────────

/// Pressure from connection-pool utilization and waiting threads.
pub struct PoolSignal {
    source: Arc<dyn PoolSource>,
    awaiting_norm: u32,
}

impl PoolSignal {
    pub fn new(source: Arc<dyn PoolSource>, awaiting_norm: u32) -> Self {
        Self {
            source,
            awaiting_norm,
        }
    }
}

impl BackpressureSignal for PoolSignal {
    fn name(&self) -> &'static str {
        "pool"
    }

    fn score(&self) -> ScoreFuture {
        let source = Arc::clone(&self.source);
        let awaiting_norm = self.awaiting_norm;
        Box::pin(async move {
            match source.fetch() {
                Ok(snapshot) => pool_pressure(&snapshot, awaiting_norm),
                Err(e) => {
                    debug!(error = %e, "pool snapshot unavailable, assuming no pressure");
                    0.0
                }
            }
        })
    }
}

/// `max(active/total, min(awaiting/norm, 1))`, with an empty pool
/// reading as zero: no pool information means no pressure, never max.
fn pool_pressure(snapshot: &PoolSnapshot, awaiting_norm: u32) -> f64 {
    if snapshot.total_connections == 0 {
        return 0.0;
    }
    let utilization =
        snapshot.active_connections as f64 / snapshot.total_connections as f64;
    let awaiting = if awaiting_norm == 0 {
        0.0
    } else {
        (snapshot.threads_awaiting_connection as f64 / awaiting_norm as f64).min(1.0)
    };
    utilization.max(awaiting).clamp(0.0, 1.0)
}

// ── Composite ─────────────────────────────────────────────────────

/// Maximum over all registered signals, clamped to [0, 1].
pub struct CompositeBackpressure {
    signals: Vec<Arc<dyn BackpressureSignal>>,
}

impl CompositeBackpressure {
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn BackpressureSignal>) -> Self {
        self.signals.push(signal);
        self
    }

    /// Current composite score. With no signals registered this is 0.0.
    pub async fn score(&self) -> f64 {
        self.dominant().await.1
    }

    /// The highest-scoring signal and its score.
    ///
    /// Control-loop logging uses the name to show which resource is the
    /// bottleneck right now.
    pub async fn dominant(&self) -> (&'static str, f64) {
        let mut best = ("none", 0.0f64);
        for signal in &self.signals {
            let score = signal.score().await.clamp(0.0, 1.0);
            if score > best.1 {
                best = (signal.name(), score);
            }
        }
        best
    }
}

impl Default for CompositeBackpressure {
    fn default() -> Self {
        Self::new()
    }
}
