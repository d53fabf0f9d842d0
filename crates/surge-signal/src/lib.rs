//! surge-signal — live pressure observation for the load core.
//!
//! Folds the two collaborator snapshots (run metrics, connection pool)
//! into one normalized backpressure score in [0, 1]. The metrics read is
//! assumed expensive, so it sits behind a TTL cache with a double-checked
//! refresh; the pool read is assumed cheap and volatile, so it is taken
//! fresh every time.
//!
//! # Architecture
//!
//! ```text
//! CompositeBackpressure ── max over signals, clamped to [0, 1]
//!   ├── QueueSignal ← MetricsCache ← dyn MetricsSource (TTL, one fetch per window)
//!   └── PoolSignal  ← dyn PoolSource (fresh every read)
//! ```
//!
//! Missing telemetry never halts the loop: a source that cannot be read
//! scores as zero pressure and is logged, not propagated.

pub mod cache;
pub mod error;
pub mod signal;
pub mod source;

pub use cache::MetricsCache;
pub use error::{SignalError, SignalResult};
pub use signal::{BackpressureSignal, CompositeBackpressure, PoolSignal, QueueSignal, ScoreFuture};
pub use source::{MetricsFuture, MetricsSource, PoolSource};
