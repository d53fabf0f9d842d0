//! Adaptive rate controller — the closed-loop rate state machine.
//!
//! Owns its state exclusively; `tick` runs on a single periodic task and
//! is never concurrent with itself, so no locking is needed. Everyone
//! else observes the target rate through a [`RateHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;
use tracing::{debug, info};

use surge_core::{RateConfig, RatePhase};

/// Shared, lock-free readout of the controller's current target rate.
///
/// The controller is the only writer; emitters and reporting read. The
/// rate travels as f64 bits inside an atomic.
#[derive(Clone)]
pub struct RateHandle {
    bits: Arc<AtomicU64>,
}

impl RateHandle {
    fn new(tps: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(tps.to_bits())),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, tps: f64) {
        self.bits.store(tps.to_bits(), Ordering::Relaxed);
    }
}

/// The rate state machine.
///
/// Per tick it reads the windowed failure rate and the composite
/// backpressure score and either ramps the target rate up (additive
/// step), ramps it down (multiplicative cut), or holds it. After any
/// ramp the controller refuses further steps for `cooldown`, giving the
/// backend's metrics time to reflect the new rate before judging again.
pub struct RateController {
    config: RateConfig,
    current_tps: f64,
    phase: RatePhase,
    /// Set by each ramp; gates the next one.
    last_ramp: Option<Instant>,
    consecutive_stable_ticks: u32,
    handle: RateHandle,
}

impl RateController {
    pub fn new(config: RateConfig) -> Self {
        let initial = config.initial_tps.clamp(config.min_tps, config.max_tps);
        Self {
            handle: RateHandle::new(initial),
            current_tps: initial,
            phase: RatePhase::Stable,
            last_ramp: None,
            consecutive_stable_ticks: 0,
            config,
        }
    }

    /// Advance the state machine one step and return the new target.
    ///
    /// Inputs are clamped to [0, 1]. Pressure at or above the high
    /// watermark forces a ramp-down regardless of the failure rate;
    /// ramp-up additionally requires the failure rate to be below
    /// `max_failure_rate`. A first tick from zero TPS ramps up like any
    /// other, no nonzero baseline required.
    pub fn tick(&mut self, failure_rate: f64, backpressure: f64) -> f64 {
        let failure_rate = failure_rate.clamp(0.0, 1.0);
        let backpressure = backpressure.clamp(0.0, 1.0);

        if let Some(last) = self.last_ramp
            && last.elapsed() < self.config.cooldown()
        {
            self.enter(RatePhase::Cooldown);
            debug!(
                tps = self.current_tps,
                backpressure, failure_rate, "holding through cooldown"
            );
            return self.current_tps;
        }

        if backpressure >= self.config.high_watermark {
            // Pressure dominates: ramp down even on a clean failure rate.
            let target = (self.current_tps * self.config.decrease_factor).max(self.config.min_tps);
            if target < self.current_tps {
                self.current_tps = target;
                self.handle.set(target);
                self.last_ramp = Some(Instant::now());
                self.enter(RatePhase::RampDown);
                info!(tps = self.current_tps, backpressure, "ramping down");
            } else {
                // Already at the floor; nothing left to shed.
                self.enter(RatePhase::Stable);
            }
            return self.current_tps;
        }

        if backpressure < self.config.low_watermark && failure_rate <= self.config.max_failure_rate
        {
            let target = (self.current_tps + self.config.step_tps).min(self.config.max_tps);
            if target > self.current_tps {
                self.current_tps = target;
                self.handle.set(target);
                self.last_ramp = Some(Instant::now());
                self.enter(RatePhase::RampUp);
                info!(tps = self.current_tps, backpressure, "ramping up");
            } else {
                // Pinned at max_tps.
                self.enter(RatePhase::Stable);
            }
            return self.current_tps;
        }

        // The hysteresis band, or failures blocking a ramp-up: hold.
        self.enter(RatePhase::Stable);
        debug!(
            tps = self.current_tps,
            backpressure, failure_rate, "holding stable"
        );
        self.current_tps
    }

    fn enter(&mut self, phase: RatePhase) {
        if phase == RatePhase::Stable {
            self.consecutive_stable_ticks = self.consecutive_stable_ticks.saturating_add(1);
        } else {
            self.consecutive_stable_ticks = 0;
        }
        if phase != self.phase {
            debug!(from = %self.phase, to = %phase, "rate phase transition");
            self.phase = phase;
        }
    }

    pub fn current_tps(&self) -> f64 {
        self.current_tps
    }

    pub fn phase(&self) -> RatePhase {
        self.phase
    }

    /// True once the rate has held stable for `stability_window`
    /// consecutive ticks. Reporting reads this; the controller itself
    /// never acts on it.
    pub fn converged(&self) -> bool {
        self.consecutive_stable_ticks >= self.config.stability_window
    }

    /// Shared readout of the current target rate.
    pub fn handle(&self) -> RateHandle {
        self.handle.clone()
    }
}
