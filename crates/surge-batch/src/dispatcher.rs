//! The micro-batch dispatcher.
//!
//! One live buffer, guarded by a mutex, replaced (never drained in
//! place) when a trigger fires. Each buffer carries an epoch so a batch
//! can be traced back to exactly one buffer lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use surge_core::{BatchConfig, WriteRequest};

/// Boxed future returned by a [`DispatchFn`].
pub type DispatchFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Receives each cut batch on its own spawned task.
///
/// The callback owns result recording; the dispatcher only counts it
/// for [`MicrobatchDispatcher::drained`].
pub type DispatchFn = Arc<dyn Fn(WriteBatch) -> DispatchFuture + Send + Sync>;

/// One batch cut from the live buffer.
#[derive(Debug)]
pub struct WriteBatch {
    /// Items in submission order.
    pub items: Vec<WriteRequest>,
    /// Submit-to-cut wait per item, same order as `items`.
    pub queue_waits: Vec<Duration>,
    /// Which buffer lifetime this batch came from.
    pub epoch: u64,
}

/// Counters exposed for reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub batches: u64,
    pub items_dispatched: u64,
    pub in_flight: u64,
}

struct Buffer {
    items: Vec<(WriteRequest, Instant)>,
    /// Stamped by the first item; the age trigger keys off this, so an
    /// idle dispatcher never flushes a brand-new item early.
    created_at: Option<Instant>,
    epoch: u64,
}

impl Buffer {
    fn fresh(epoch: u64, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            created_at: None,
            epoch,
        }
    }
}

struct Shared {
    buffer: Mutex<Buffer>,
    size_limit: usize,
    time_limit: Duration,
    dispatch: DispatchFn,
    closed: AtomicBool,
    in_flight: AtomicU64,
    submitted: AtomicU64,
    batches: AtomicU64,
    items_dispatched: AtomicU64,
}

impl Shared {
    /// Swap in a fresh buffer and package the old one. Must be called
    /// with the buffer lock held.
    fn cut(&self, buffer: &mut Buffer) -> WriteBatch {
        let next = Buffer::fresh(buffer.epoch + 1, self.size_limit);
        let old = std::mem::replace(buffer, next);
        let now = Instant::now();
        let mut items = Vec::with_capacity(old.items.len());
        let mut queue_waits = Vec::with_capacity(old.items.len());
        for (request, enqueued_at) in old.items {
            queue_waits.push(now.saturating_duration_since(enqueued_at));
            items.push(request);
        }
        WriteBatch {
            items,
            queue_waits,
            epoch: old.epoch,
        }
    }

    fn spawn_dispatch(self: &Arc<Self>, batch: WriteBatch, trigger: &'static str) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.items_dispatched
            .fetch_add(batch.items.len() as u64, Ordering::Relaxed);
        debug!(
            items = batch.items.len(),
            epoch = batch.epoch,
            trigger,
            "dispatching batch"
        );

        let future = (self.dispatch)(batch);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            future.await;
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Cut the live buffer if its first item has aged past the time
    /// limit. Runs on the flusher task.
    async fn flush_due(self: &Arc<Self>) {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            match buffer.created_at {
                Some(at) if at.elapsed() >= self.time_limit => Some(self.cut(&mut buffer)),
                _ => None,
            }
        };
        if let Some(batch) = batch {
            self.spawn_dispatch(batch, "time");
        }
    }
}

/// Coalesces submitted writes into batches under a dual size-or-time
/// trigger.
///
/// Must be created inside a Tokio runtime; `new` spawns the background
/// flusher that enforces the time trigger independent of traffic.
pub struct MicrobatchDispatcher {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
}

impl MicrobatchDispatcher {
    pub fn new(config: BatchConfig, dispatch: DispatchFn) -> Self {
        let time_limit = config.time_limit();
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer::fresh(0, config.size_limit)),
            size_limit: config.size_limit,
            time_limit,
            dispatch,
            closed: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            items_dispatched: AtomicU64::new(0),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run_flusher(Arc::clone(&shared), time_limit, shutdown_rx));

        Self {
            shared,
            shutdown_tx,
        }
    }

    /// Enqueue one write. Returns false if the dispatcher is closed.
    ///
    /// The append that reaches the size limit cuts the buffer inline;
    /// the caller still returns immediately because the dispatch itself
    /// runs on a spawned task.
    pub async fn submit(&self, request: WriteRequest) -> bool {
        let cut = {
            let mut buffer = self.shared.buffer.lock().await;
            if self.shared.closed.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if buffer.items.is_empty() {
                buffer.created_at = Some(now);
            }
            buffer.items.push((request, now));
            self.shared.submitted.fetch_add(1, Ordering::Relaxed);
            if buffer.items.len() >= self.shared.size_limit {
                Some(self.shared.cut(&mut buffer))
            } else {
                None
            }
        };

        if let Some(batch) = cut {
            self.shared.spawn_dispatch(batch, "size");
        }
        true
    }

    /// Stop accepting writes, stop the flusher, and flush the partial
    /// buffer exactly once. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let batch = {
            let mut buffer = self.shared.buffer.lock().await;
            if buffer.items.is_empty() {
                None
            } else {
                Some(self.shared.cut(&mut buffer))
            }
        };
        if let Some(batch) = batch {
            self.shared.spawn_dispatch(batch, "close");
        }

        info!(
            submitted = self.shared.submitted.load(Ordering::Relaxed),
            batches = self.shared.batches.load(Ordering::Relaxed),
            "dispatcher closed"
        );
    }

    /// Wait until every spawned dispatch has completed.
    pub async fn drained(&self) {
        while self.shared.in_flight.load(Ordering::Acquire) > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            batches: self.shared.batches.load(Ordering::Relaxed),
            items_dispatched: self.shared.items_dispatched.load(Ordering::Relaxed),
            in_flight: self.shared.in_flight.load(Ordering::Acquire),
        }
    }
}

/// Enforces the time trigger: an overdue partial buffer is flushed even
/// when no traffic arrives to push it over the size limit.
async fn run_flusher(
    shared: Arc<Shared>,
    time_limit: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = (time_limit / 4).max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                shared.flush_due().await;
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
}
