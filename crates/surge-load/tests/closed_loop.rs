//! Closed-loop integration tests for the load runner.
//!
//! These tests drive [`LoadRunner`] end to end under paused time and prove
//! that:
//! 1. A healthy backend lets the controller ramp to the ceiling and every
//!    accepted write is executed exactly once
//! 2. A saturated pool pushes the score past the high watermark, the gate
//!    rejects, and the controller ramps down
//! 3. Shutdown (deadline or external stop) drains in-flight work so the
//!    bookkeeping identity `submitted == accepted + dropped + rejected`
//!    holds in the final summary
//! 4. Each admission strategy shapes traffic the way it claims to
//!
//! The backend is a stub executor; no real writes leave the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use surge_batch::WriteBatch;
use surge_core::{
    AdmissionDecision, AdmissionStrategy, BatchResult, LoadConfig, PoolSnapshot, WriteRequest,
};
use surge_load::{ExecuteFuture, LoadRunner, WriteExecutor};
use surge_signal::{PoolSource, SignalResult};

// ── Tracing setup ─────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Initialize tracing subscriber for debug output in CI.
/// Controlled by `RUST_LOG` env var (e.g. `RUST_LOG=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Stub backends ─────────────────────────────────────────────────

/// Executes every write instantly and successfully.
struct PerfectExecutor;

impl WriteExecutor for PerfectExecutor {
    fn execute(&self, batch: WriteBatch) -> ExecuteFuture {
        Box::pin(async move {
            BatchResult {
                success_count: batch.items.len() as u64,
                failure_count: 0,
            }
        })
    }
}

/// Fails every write.
struct FailingExecutor;

impl WriteExecutor for FailingExecutor {
    fn execute(&self, batch: WriteBatch) -> ExecuteFuture {
        Box::pin(async move {
            BatchResult {
                success_count: 0,
                failure_count: batch.items.len() as u64,
            }
        })
    }
}

/// Succeeds and records the payload length of every executed write.
struct RecordingExecutor {
    payload_lens: Arc<Mutex<Vec<usize>>>,
}

impl WriteExecutor for RecordingExecutor {
    fn execute(&self, batch: WriteBatch) -> ExecuteFuture {
        let lens = Arc::clone(&self.payload_lens);
        Box::pin(async move {
            let count = batch.items.len() as u64;
            let mut lens = lens.lock().unwrap();
            for item in &batch.items {
                lens.push(item.payload.len());
            }
            BatchResult {
                success_count: count,
                failure_count: 0,
            }
        })
    }
}

/// Counts executed items across batches.
struct CountingExecutor {
    executed: Arc<AtomicU64>,
}

impl WriteExecutor for CountingExecutor {
    fn execute(&self, batch: WriteBatch) -> ExecuteFuture {
        let executed = Arc::clone(&self.executed);
        Box::pin(async move {
            let count = batch.items.len() as u64;
            executed.fetch_add(count, Ordering::Relaxed);
            BatchResult {
                success_count: count,
                failure_count: 0,
            }
        })
    }
}

/// A pool with headroom: zero pressure.
struct IdlePool;

impl PoolSource for IdlePool {
    fn fetch(&self) -> SignalResult<PoolSnapshot> {
        Ok(PoolSnapshot {
            active_connections: 0,
            total_connections: 10,
            threads_awaiting_connection: 0,
        })
    }
}

/// Every connection checked out and callers queued behind them.
struct SaturatedPool;

impl PoolSource for SaturatedPool {
    fn fetch(&self) -> SignalResult<PoolSnapshot> {
        Ok(PoolSnapshot {
            active_connections: 10,
            total_connections: 10,
            threads_awaiting_connection: 10,
        })
    }
}

/// Pool metrics endpoint is unreachable.
struct OfflinePool;

impl PoolSource for OfflinePool {
    fn fetch(&self) -> SignalResult<PoolSnapshot> {
        Err(anyhow::anyhow!("pool metrics endpoint offline").into())
    }
}

// ── Config helpers ────────────────────────────────────────────────

/// Compressed timing so multi-step runs finish in milliseconds of paused
/// time: 50 ms control steps, no cooldown, small batches.
fn fast_config() -> LoadConfig {
    let mut config = LoadConfig::default();
    config.rate.initial_tps = 20.0;
    config.rate.max_tps = 200.0;
    config.rate.step_tps = 20.0;
    config.rate.step_duration_ms = 50;
    config.rate.cooldown_ms = 0;
    config.signal.cache_ttl_ms = 10;
    config.batch.size_limit = 10;
    config.batch.time_limit_ms = 20;
    config.workload.payload_bytes = 64;
    config
}

// ── Ramp behavior ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn healthy_backend_ramps_to_the_ceiling() {
    init_tracing();
    let config = fast_config();
    let max_tps = config.rate.max_tps;
    let runner = LoadRunner::new(config, Arc::new(PerfectExecutor), Arc::new(IdlePool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_secs(2)).await;

    // 40 control ticks at +20 tps reach the 200 tps ceiling early and
    // hold there.
    assert_eq!(summary.final_tps, max_tps);
    assert!(summary.converged, "rate should settle at the ceiling");
    assert!(summary.executed > 0, "paced writes should reach the backend");
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.rejected, 0, "an idle system should admit everything");
    assert_eq!(
        summary.submitted,
        summary.accepted + summary.dropped + summary.rejected
    );
    assert_eq!(
        summary.executed, summary.accepted,
        "every accepted write executes exactly once"
    );
}

#[tokio::test(start_paused = true)]
async fn saturated_pool_throttles_and_rejects() {
    init_tracing();
    let mut config = fast_config();
    config.rate.initial_tps = 50.0;
    let runner = LoadRunner::new(config, Arc::new(PerfectExecutor), Arc::new(SaturatedPool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_millis(1500)).await;

    assert!(summary.rejected > 0, "full pool must reject at the gate");
    assert_eq!(summary.accepted, 0);
    assert_eq!(summary.executed, 0);
    assert_eq!(summary.batches, 0, "nothing admitted, nothing batched");
    assert!(
        summary.final_tps < 1.0,
        "repeated ramp-downs should collapse the rate, got {}",
        summary.final_tps
    );
    assert!(!summary.converged, "a collapsing rate is not convergence");
    assert!(matches!(
        runner.last_decision(),
        Some(AdmissionDecision::Reject(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failing_backend_blocks_ramp_up() {
    init_tracing();
    let mut config = fast_config();
    config.rate.initial_tps = 40.0;
    let max_tps = config.rate.max_tps;
    let runner = LoadRunner::new(config, Arc::new(FailingExecutor), Arc::new(IdlePool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_secs(2)).await;

    // Backpressure stays low, so the controller never ramps down, but the
    // failure window blocks every further ramp-up.
    assert!(summary.failed > 0);
    assert_eq!(summary.failed, summary.executed);
    assert!(
        summary.final_tps < max_tps,
        "failures should pin the rate below the ceiling, got {}",
        summary.final_tps
    );
    assert!(summary.converged, "holding steady under failures counts as converged");
}

#[tokio::test(start_paused = true)]
async fn offline_pool_reads_as_no_pressure() {
    init_tracing();
    let config = fast_config();
    let initial = config.rate.initial_tps;
    let runner = LoadRunner::new(config, Arc::new(PerfectExecutor), Arc::new(OfflinePool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_secs(1)).await;

    // A dead metrics endpoint is not evidence of load; the run proceeds
    // as if the pool were idle.
    assert!(summary.final_tps > initial);
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.failed, 0);
}

// ── Shutdown accounting ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deadline_shutdown_balances_the_books() {
    init_tracing();
    let mut config = fast_config();
    config.rate.initial_tps = 40.0;
    let runner = LoadRunner::new(config, Arc::new(PerfectExecutor), Arc::new(IdlePool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_millis(500)).await;

    assert!(summary.submitted > 0);
    assert_eq!(
        summary.submitted,
        summary.accepted + summary.dropped + summary.rejected
    );
    assert_eq!(
        summary.executed, summary.accepted,
        "the tail batch must flush before the summary is cut"
    );
    assert!(summary.batches >= 1);
    assert_eq!(
        runner.metrics().queue_depth(),
        0,
        "queue gauge must drain to zero after the run"
    );
}

#[tokio::test(start_paused = true)]
async fn external_stop_ends_the_run_early() {
    init_tracing();
    let mut config = fast_config();
    config.rate.initial_tps = 40.0;
    let runner = Arc::new(
        LoadRunner::new(config, Arc::new(PerfectExecutor), Arc::new(IdlePool))
            .expect("config is valid"),
    );

    let stopper = Arc::clone(&runner);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.stop();
    });

    let started = tokio::time::Instant::now();
    let summary = runner.run(Duration::from_secs(3600)).await;

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop must cut the hour-long deadline short"
    );
    assert!(summary.submitted > 0);
    assert_eq!(
        summary.submitted,
        summary.accepted + summary.dropped + summary.rejected
    );
    assert_eq!(summary.executed, summary.accepted);
}

// ── Strategy behavior under pressure ──────────────────────────────

#[tokio::test(start_paused = true)]
async fn degrade_strategy_forwards_reduced_payloads() {
    init_tracing();
    let mut config = fast_config();
    config.rate.initial_tps = 50.0;
    config.admission.strategy = AdmissionStrategy::Degrade;
    let payload_lens = Arc::new(Mutex::new(Vec::new()));
    let executor = RecordingExecutor {
        payload_lens: Arc::clone(&payload_lens),
    };
    let runner = LoadRunner::new(config, Arc::new(executor), Arc::new(SaturatedPool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_secs(1)).await;

    assert!(summary.degraded > 0, "saturation should trigger degradation");
    assert_eq!(
        summary.degraded, summary.accepted,
        "under constant saturation every forwarded write is degraded"
    );
    assert_eq!(summary.executed, summary.accepted);
    let lens = payload_lens.lock().unwrap();
    assert!(!lens.is_empty());
    for len in lens.iter() {
        // 64-byte payloads halved by the default degrade factor.
        assert_eq!(*len, 32);
    }
}

#[tokio::test(start_paused = true)]
async fn retry_strategy_spends_its_budget_then_rejects() {
    init_tracing();
    let mut config = fast_config();
    config.rate.initial_tps = 50.0;
    config.admission.strategy = AdmissionStrategy::Retry;
    config.admission.retry_base_ms = 10;
    config.admission.retry_max_ms = 50;
    let runner = LoadRunner::new(config, Arc::new(PerfectExecutor), Arc::new(SaturatedPool))
        .expect("config is valid");

    let summary = runner.run(Duration::from_secs(1)).await;

    // Saturation never clears, so every write burns its full retry budget
    // (or sheds at shutdown) and nothing is admitted.
    assert!(summary.retries > 0);
    assert!(summary.rejected > 0, "exhausted budgets count as rejections");
    assert_eq!(summary.accepted, 0);
    assert!(
        summary.retries >= 3 * summary.rejected,
        "each gate rejection must be preceded by a full retry budget"
    );
    assert_eq!(
        summary.submitted,
        summary.accepted + summary.dropped + summary.rejected
    );
}

// ── External submissions ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn external_writes_share_the_admission_path() {
    init_tracing();
    let mut config = fast_config();
    // No paced emission; this run only carries externally submitted writes.
    config.rate.initial_tps = 0.0;
    config.rate.step_tps = 0.1;
    config.rate.max_tps = 0.1;
    let executed = Arc::new(AtomicU64::new(0));
    let executor = CountingExecutor {
        executed: Arc::clone(&executed),
    };
    let runner = Arc::new(
        LoadRunner::new(config, Arc::new(executor), Arc::new(IdlePool))
            .expect("config is valid"),
    );

    let submitter = Arc::clone(&runner);
    tokio::spawn(async move {
        for seq in 0..25 {
            submitter.submit(WriteRequest {
                seq,
                payload: vec![0xAB; 16],
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        submitter.stop();
    });

    let summary = runner.run(Duration::from_secs(3600)).await;

    assert_eq!(summary.accepted, 25);
    assert_eq!(summary.executed, 25);
    assert_eq!(executed.load(Ordering::Relaxed), 25);
}
