//! surge-control — deciding how fast to go and what to let through.
//!
//! Two pieces, both pure decision-makers over the signals that
//! `surge-signal` computes:
//!
//! - [`RateController`] runs once per control tick and moves the target
//!   rate through a ramp-up / stable / ramp-down / cooldown state
//!   machine. Pressure at or above the high watermark always wins;
//!   ramp-up needs pressure below the low watermark and a clean failure
//!   rate. The band in between holds the rate steady, which is what
//!   keeps noisy signals from causing an oscillation storm.
//! - [`AdmissionGate`] turns the current backpressure score into a
//!   per-request decision under one of five strategies.
//!
//! # Rate algorithm
//!
//! ```text
//! tick(failure_rate, backpressure):
//!     in cooldown            → hold (phase Cooldown)
//!     backpressure ≥ 0.7     → current *= decrease_factor   (RampDown)
//!     backpressure < 0.3
//!       and failures low     → current += step_tps          (RampUp)
//!     otherwise              → hold                         (Stable)
//! ```
//!
//! Neither piece ever fails: missing data arrives as zero pressure and
//! every branch returns a decision.

pub mod admission;
pub mod controller;

pub use admission::{AdmissionCounts, AdmissionGate};
pub use controller::{RateController, RateHandle};
