//! surge-load — the closed-loop write-load runner.
//!
//! Assembles the whole feedback loop around a pluggable [`WriteExecutor`]:
//!
//! ```text
//!              ┌────────────── control task (per step) ──────────────┐
//!              │  MetricsCache ──► failure-rate window               │
//!              │  CompositeBackpressure ──► score                    │
//!              │          └──► RateController.tick ──► RateHandle    │
//!              └─────────────────────────────────────────────────────┘
//!                                        │ current tps
//!                                        ▼
//!  emission task ──► AdmissionGate ──► MicrobatchDispatcher ──► WriteExecutor
//!       (paced)        (per write)        (size/time cut)           │
//!                                        ▲                          │
//!                                        └──── LoadMetrics ◄────────┘
//! ```
//!
//! Executed batches feed [`LoadMetrics`], which backs both the failure-rate
//! window and the queue signal, closing the loop.

pub mod executor;
pub mod metrics;
pub mod runner;

pub use executor::{ExecuteFuture, WriteExecutor};
pub use metrics::LoadMetrics;
pub use runner::{LoadRunner, RunSummary};
