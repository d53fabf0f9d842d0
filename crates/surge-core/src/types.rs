//! Domain types shared across the surge crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Requests ──────────────────────────────────────────────────────

/// One synthetic write destined for the backend.
///
/// The payload is opaque to the core; only its length matters to the
/// DEGRADE admission strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Monotonic sequence number assigned at emission.
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl WriteRequest {
    /// Copy of this request with the payload cut down to `factor` of its
    /// original length (rounded up). `factor` is clamped to [0, 1].
    pub fn degraded(&self, factor: f64) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        let keep = ((self.payload.len() as f64) * factor).ceil() as usize;
        Self {
            seq: self.seq,
            payload: self.payload[..keep.min(self.payload.len())].to_vec(),
        }
    }
}

/// Outcome of one dispatched batch, reported by the executor.
///
/// Transient backend failures surface here as `failure_count`, never as
/// an error up the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success_count: u64,
    pub failure_count: u64,
}

// ── Observation snapshots ─────────────────────────────────────────

/// Point-in-time view of run metrics.
///
/// Counters are cumulative for the run; consumers that need windowed
/// rates diff consecutive snapshots. Immutable once produced, which is
/// what lets the cache hand out clones without coordination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub failure_count: u64,
    /// Fraction of executions that succeeded; 1.0 when nothing ran yet.
    pub success_rate: f64,
    /// Writes accepted but not yet executed.
    pub queue_depth: u64,
    pub queue_wait_p50: Duration,
    pub queue_wait_p95: Duration,
    pub queue_wait_p99: Duration,
}

/// Point-in-time view of the backend connection pool.
///
/// Pool state moves faster than metrics, so this is fetched fresh on
/// every read and never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub active_connections: u32,
    pub total_connections: u32,
    pub threads_awaiting_connection: u32,
}

// ── Control vocabulary ────────────────────────────────────────────

/// Phase of the rate controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePhase {
    RampUp,
    Stable,
    RampDown,
    Cooldown,
}

impl std::fmt::Display for RatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RatePhase::RampUp => write!(f, "ramp_up"),
            RatePhase::Stable => write!(f, "stable"),
            RatePhase::RampDown => write!(f, "ramp_down"),
            RatePhase::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RejectReason {
    /// Backpressure score at decision time.
    pub score: f64,
    /// The threshold the score met or exceeded.
    pub threshold: f64,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "backpressure {:.2} at or above threshold {:.2}",
            self.score, self.threshold
        )
    }
}

/// Per-request verdict from the admission gate.
///
/// Produced per request and consumed immediately by the caller; the gate
/// keeps only the most recent one for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// Forward unchanged.
    Accept,
    /// Discard silently; only the counter records it.
    Drop,
    /// Tell the caller explicitly, with the score that caused it.
    Reject(RejectReason),
    /// Ask the caller to resubmit after `backoff`.
    Retry { backoff: Duration },
    /// Forward with reduced fidelity instead of rejecting.
    Degrade(WriteRequest),
}

impl AdmissionDecision {
    /// Stable label for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionDecision::Accept => "accept",
            AdmissionDecision::Drop => "drop",
            AdmissionDecision::Reject(_) => "reject",
            AdmissionDecision::Retry { .. } => "retry",
            AdmissionDecision::Degrade(_) => "degrade",
        }
    }
}
