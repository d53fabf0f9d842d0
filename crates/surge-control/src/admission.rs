//! Admission gate — per-request decisions from the backpressure score.
//!
//! One strategy is active for the whole run; the gate itself is a pure
//! table lookup plus counters. It never fails: absent telemetry has
//! already degraded to a zero score upstream.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use surge_core::{AdmissionConfig, AdmissionDecision, AdmissionStrategy, RejectReason, WriteRequest};

/// Totals per decision kind since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionCounts {
    pub accepted: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub retried: u64,
    pub degraded: u64,
}

/// Applies the configured admission strategy to each request.
///
/// Thread-safe and called from every emitter concurrently; decisions
/// are made from the arguments alone, counters are atomics, and the
/// `last_decision` slot is a short-hold mutex (store or clone, nothing
/// else, never held across await).
pub struct AdmissionGate {
    config: AdmissionConfig,
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    degraded: AtomicU64,
    last_decision: Mutex<Option<AdmissionDecision>>,
}

impl AdmissionGate {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            last_decision: Mutex::new(None),
        }
    }

    /// Decide what happens to `request` at the given score.
    ///
    /// Threshold comparisons are inclusive: a score exactly at a
    /// threshold takes the stricter path.
    pub fn admit(&self, score: f64, request: &WriteRequest) -> AdmissionDecision {
        let score = score.clamp(0.0, 1.0);
        let config = &self.config;

        let decision = match config.strategy {
            AdmissionStrategy::Threshold => {
                if score >= config.threshold {
                    AdmissionDecision::Reject(RejectReason {
                        score,
                        threshold: config.threshold,
                    })
                } else {
                    AdmissionDecision::Accept
                }
            }
            AdmissionStrategy::Drop => {
                if score >= config.drop_threshold {
                    AdmissionDecision::Drop
                } else if score >= config.reject_threshold {
                    AdmissionDecision::Reject(RejectReason {
                        score,
                        threshold: config.reject_threshold,
                    })
                } else {
                    AdmissionDecision::Accept
                }
            }
            AdmissionStrategy::Reject => {
                if score >= config.reject_threshold {
                    AdmissionDecision::Reject(RejectReason {
                        score,
                        threshold: config.reject_threshold,
                    })
                } else {
                    AdmissionDecision::Accept
                }
            }
            AdmissionStrategy::Retry => {
                if score >= config.reject_threshold {
                    AdmissionDecision::Retry {
                        backoff: self.backoff_for(score),
                    }
                } else {
                    AdmissionDecision::Accept
                }
            }
            AdmissionStrategy::Degrade => {
                if score >= config.reject_threshold {
                    AdmissionDecision::Degrade(request.degraded(config.degrade_factor))
                } else {
                    AdmissionDecision::Accept
                }
            }
        };

        self.count(&decision);
        *self.last_decision.lock().unwrap() = Some(decision.clone());
        decision
    }

    /// Backoff grows exponentially with how far the score overshoots
    /// the reject threshold, from `retry_base` right at the threshold
    /// up to `retry_max` at full saturation.
    fn backoff_for(&self, score: f64) -> Duration {
        let threshold = self.config.reject_threshold;
        let span = (1.0 - threshold).max(f64::EPSILON);
        let overshoot = ((score - threshold) / span).clamp(0.0, 1.0);
        let ms = self.config.retry_base_ms as f64
            * 2f64.powf(overshoot * self.config.retry_doublings as f64);
        Duration::from_millis((ms as u64).min(self.config.retry_max_ms))
    }

    fn count(&self, decision: &AdmissionDecision) {
        let counter = match decision {
            AdmissionDecision::Accept => &self.accepted,
            AdmissionDecision::Drop => &self.dropped,
            AdmissionDecision::Reject(_) => &self.rejected,
            AdmissionDecision::Retry { .. } => &self.retried,
            AdmissionDecision::Degrade(_) => &self.degraded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> AdmissionCounts {
        AdmissionCounts {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Most recent decision, for observability.
    pub fn last_decision(&self) -> Option<AdmissionDecision> {
        self.last_decision.lock().unwrap().clone()
    }

    pub fn strategy(&self) -> AdmissionStrategy {
        self.config.strategy
    }
}
