//! Load runner — paced emission under rate control and admission.
//!
//! [`LoadRunner::run`] drives two background tasks. The control task ticks
//! once per step: it reads the cached metrics snapshot, derives the failure
//! rate of the window since its last tick, polls the composite backpressure
//! score, and feeds both into the rate controller. The emission task paces
//! writes at the controller's published rate, spawning one short-lived task
//! per write so a slow admission path (retry backoff) never stalls the
//! pacing clock. Shutdown is a watch flag: emitters shed or finish, the
//! dispatcher flushes its tail batch, and the run summary is cut only after
//! every in-flight batch has executed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use surge_batch::{DispatchFn, DispatchFuture, MicrobatchDispatcher, WriteBatch};
use surge_control::{AdmissionCounts, AdmissionGate, RateController, RateHandle};
use surge_core::{AdmissionDecision, ConfigResult, LoadConfig, WriteRequest};
use surge_signal::{CompositeBackpressure, MetricsCache, PoolSignal, PoolSource, QueueSignal};

use crate::executor::WriteExecutor;
use crate::metrics::LoadMetrics;

/// Final accounting for one run.
///
/// `submitted == accepted + dropped + rejected` always holds once `run`
/// returns; `degraded` counts the subset of `accepted` that was forwarded
/// with a reduced payload, and `retries` counts backoff waits, not writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub submitted: u64,
    pub accepted: u64,
    pub degraded: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub retries: u64,
    pub executed: u64,
    pub failed: u64,
    pub batches: u64,
    pub final_tps: f64,
    pub converged: bool,
}

#[derive(Default)]
struct RunCounters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    degraded: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
}

/// Everything an emitter task needs, shared behind one `Arc`.
struct EmitContext {
    composite: Arc<CompositeBackpressure>,
    gate: Arc<AdmissionGate>,
    dispatcher: Arc<MicrobatchDispatcher>,
    metrics: LoadMetrics,
    counters: RunCounters,
    seq: AtomicU64,
    payload_bytes: usize,
    max_retry_attempts: u32,
    stop: watch::Receiver<bool>,
    in_flight_emitters: AtomicU64,
}

impl EmitContext {
    fn next_request(&self) -> WriteRequest {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let fill = (seq % 251) as u8;
        WriteRequest {
            seq,
            payload: vec![fill; self.payload_bytes],
        }
    }

    /// Runs one write through the admission gate until it is forwarded or
    /// shed. Retry backoffs sleep here, off the pacing clock.
    async fn admit_and_forward(&self, request: WriteRequest) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let mut stop = self.stop.clone();
        let mut attempts = 0u32;
        loop {
            let score = self.composite.score().await;
            match self.gate.admit(score, &request) {
                AdmissionDecision::Accept => {
                    self.forward(request).await;
                    return;
                }
                AdmissionDecision::Degrade(reduced) => {
                    debug!(seq = reduced.seq, score, "forwarding degraded write");
                    if self.forward(reduced).await {
                        self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                    }
                    return;
                }
                AdmissionDecision::Drop => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                AdmissionDecision::Reject(reason) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(%reason, seq = request.seq, "write rejected");
                    return;
                }
                AdmissionDecision::Retry { backoff } => {
                    if attempts >= self.max_retry_attempts {
                        debug!(seq = request.seq, attempts, "retry budget exhausted");
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    attempts += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = stop.changed() => {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn forward(&self, request: WriteRequest) -> bool {
        if self.dispatcher.submit(request).await {
            self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            self.metrics.add_queued(1);
            true
        } else {
            // Dispatcher already closed; the write is shed.
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}

fn spawn_submission(ctx: &Arc<EmitContext>, request: WriteRequest) {
    ctx.in_flight_emitters.fetch_add(1, Ordering::AcqRel);
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        ctx.admit_and_forward(request).await;
        ctx.in_flight_emitters.fetch_sub(1, Ordering::AcqRel);
    });
}

/// Closed-loop load runner.
///
/// Owns the full chain from rate controller to dispatcher. Construct it
/// inside a Tokio runtime (the dispatcher spawns its flusher immediately),
/// then call [`run`](Self::run) to drive a timed emission loop, or
/// [`submit`](Self::submit) to push externally produced writes through the
/// same admission path.
pub struct LoadRunner {
    config: LoadConfig,
    cache: Arc<MetricsCache>,
    controller: Arc<tokio::sync::Mutex<RateController>>,
    rate: RateHandle,
    ctx: Arc<EmitContext>,
    stop_tx: watch::Sender<bool>,
}

impl LoadRunner {
    pub fn new(
        config: LoadConfig,
        executor: Arc<dyn WriteExecutor>,
        pool: Arc<dyn PoolSource>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let metrics = LoadMetrics::new();
        let cache = Arc::new(MetricsCache::new(
            Arc::new(metrics.clone()),
            config.signal.cache_ttl(),
        ));
        let composite = Arc::new(
            CompositeBackpressure::new()
                .with_signal(Arc::new(QueueSignal::new(
                    Arc::clone(&cache),
                    config.signal.queue_capacity,
                )))
                .with_signal(Arc::new(PoolSignal::new(pool, config.signal.awaiting_norm))),
        );
        let gate = Arc::new(AdmissionGate::new(config.admission.clone()));

        // Bridge: executed batches report their outcome and free their slots
        // in the queue-depth gauge.
        let bridge_metrics = metrics.clone();
        let dispatch: DispatchFn = Arc::new(move |mut batch: WriteBatch| {
            let executor = Arc::clone(&executor);
            let metrics = bridge_metrics.clone();
            let waits = std::mem::take(&mut batch.queue_waits);
            let len = batch.items.len() as u64;
            Box::pin(async move {
                let result = executor.execute(batch).await;
                metrics.record_batch(&result, &waits).await;
                metrics.remove_queued(len);
            }) as DispatchFuture
        });
        let dispatcher = Arc::new(MicrobatchDispatcher::new(config.batch.clone(), dispatch));

        let controller = RateController::new(config.rate.clone());
        let rate = controller.handle();

        let (stop_tx, stop_rx) = watch::channel(false);

        let ctx = Arc::new(EmitContext {
            composite,
            gate,
            dispatcher,
            metrics,
            counters: RunCounters::default(),
            seq: AtomicU64::new(0),
            payload_bytes: config.workload.payload_bytes,
            max_retry_attempts: config.admission.max_retry_attempts,
            stop: stop_rx,
            in_flight_emitters: AtomicU64::new(0),
        });

        Ok(Self {
            config,
            cache,
            controller: Arc::new(tokio::sync::Mutex::new(controller)),
            rate,
            ctx,
            stop_tx,
        })
    }

    /// Drives paced emission until the deadline or an external [`stop`].
    ///
    /// Returns only after every accepted write has been dispatched and
    /// executed, so the summary's bookkeeping is final.
    pub async fn run(&self, duration: Duration) -> RunSummary {
        info!(
            duration_secs = duration.as_secs_f64(),
            initial_tps = self.rate.get(),
            strategy = %self.ctx.gate.strategy(),
            "load run starting"
        );

        let control = tokio::spawn(run_control(
            Arc::clone(&self.controller),
            Arc::clone(&self.cache),
            Arc::clone(&self.ctx.composite),
            self.config.rate.step_duration(),
            self.ctx.stop.clone(),
        ));
        let emission = tokio::spawn(run_emission(
            Arc::clone(&self.ctx),
            self.rate.clone(),
            self.config.rate.step_duration(),
        ));

        let mut stop = self.ctx.stop.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {
                info!("run deadline reached");
            }
            _ = stop.changed() => {
                info!("stop requested");
            }
        }
        let _ = self.stop_tx.send(true);

        let _ = emission.await;
        let _ = control.await;

        // Emitters still inside the admission path shed or finish quickly
        // once the stop flag is up; wait them out before the final flush.
        while self.ctx.in_flight_emitters.load(Ordering::Acquire) > 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.ctx.dispatcher.close().await;
        self.ctx.dispatcher.drained().await;

        let summary = self.summary().await;
        info!(
            submitted = summary.submitted,
            executed = summary.executed,
            failed = summary.failed,
            batches = summary.batches,
            final_tps = summary.final_tps,
            "load run complete"
        );
        summary
    }

    /// Requests shutdown of a run in progress. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Pushes an externally produced write through the admission path.
    pub fn submit(&self, request: WriteRequest) {
        spawn_submission(&self.ctx, request);
    }

    /// Currently published emission rate.
    pub fn current_rate(&self) -> f64 {
        self.rate.get()
    }

    /// Most recent admission decision, for observability.
    pub fn last_decision(&self) -> Option<AdmissionDecision> {
        self.ctx.gate.last_decision()
    }

    pub fn admission_counts(&self) -> AdmissionCounts {
        self.ctx.gate.counts()
    }

    /// Handle onto the run's live metrics.
    pub fn metrics(&self) -> LoadMetrics {
        self.ctx.metrics.clone()
    }

    async fn summary(&self) -> RunSummary {
        let snapshot = self.ctx.metrics.snapshot().await;
        let stats = self.ctx.dispatcher.stats();
        let controller = self.controller.lock().await;
        let counters = &self.ctx.counters;
        RunSummary {
            submitted: counters.submitted.load(Ordering::Relaxed),
            accepted: counters.accepted.load(Ordering::Relaxed),
            degraded: counters.degraded.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            executed: snapshot.total_executions,
            failed: snapshot.failure_count,
            batches: stats.batches,
            final_tps: controller.current_tps(),
            converged: controller.converged(),
        }
    }
}

/// One controller tick per step: windowed failure rate from snapshot deltas
/// plus the live composite score.
async fn run_control(
    controller: Arc<tokio::sync::Mutex<RateController>>,
    cache: Arc<MetricsCache>,
    composite: Arc<CompositeBackpressure>,
    step: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(step);
    let mut prev_executions = 0u64;
    let mut prev_failures = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let failure_rate = match cache.get().await {
                    Some(snapshot) => {
                        let executions = snapshot.total_executions.saturating_sub(prev_executions);
                        let failures = snapshot.failure_count.saturating_sub(prev_failures);
                        prev_executions = snapshot.total_executions;
                        prev_failures = snapshot.failure_count;
                        if executions == 0 {
                            0.0
                        } else {
                            failures as f64 / executions as f64
                        }
                    }
                    None => 0.0,
                };
                let (bottleneck, score) = composite.dominant().await;
                let tps = controller.lock().await.tick(failure_rate, score);
                debug!(tps, failure_rate, backpressure = score, bottleneck, "control tick");
            }
            _ = stop.changed() => break,
        }
    }
}

/// Emits one write per `1 / tps` seconds at the controller's current rate.
async fn run_emission(ctx: Arc<EmitContext>, rate: RateHandle, idle_poll: Duration) {
    let mut stop = ctx.stop.clone();
    let mut next = Instant::now();
    loop {
        if *stop.borrow() {
            break;
        }
        let tps = rate.get();
        if tps <= 0.0 {
            // Nothing to pace; poll for a rate change or shutdown.
            tokio::select! {
                _ = tokio::time::sleep(idle_poll) => {
                    next = Instant::now();
                    continue;
                }
                _ = stop.changed() => break,
            }
        }
        // Very low rates pace as if idle; the cap also keeps the deadline
        // arithmetic in range.
        let secs = (1.0 / tps).min(3600.0);
        next += Duration::from_secs_f64(secs);
        let now = Instant::now();
        if next < now {
            // The rate rose while we slept; resume from now instead of
            // bursting to catch up.
            next = now;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(next) => {
                let request = ctx.next_request();
                spawn_submission(&ctx, request);
            }
            _ = stop.changed() => break,
        }
    }
}
