//! Collaborator seams: where snapshots come from.
//!
//! The load core never talks to a real backend; it observes it through
//! these two traits. Harnesses and the in-process metrics provider plug
//! in here.

use surge_core::{MetricsSnapshot, PoolSnapshot};

use crate::error::SignalResult;

/// Boxed future returned by [`MetricsSource::fetch`].
pub type MetricsFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = SignalResult<MetricsSnapshot>> + Send>>;

/// A potentially expensive metrics read.
///
/// Implementations may scan counters and sort latency samples; callers
/// must go through [`MetricsCache`](crate::cache::MetricsCache) rather
/// than fetching directly, so the cost is bounded by the TTL.
pub trait MetricsSource: Send + Sync {
    fn fetch(&self) -> MetricsFuture;
}

/// Connection-pool introspection.
///
/// Pool state changes faster than metrics, so reads are synchronous and
/// uncached; every score computation sees the live pool.
pub trait PoolSource: Send + Sync {
    fn fetch(&self) -> SignalResult<PoolSnapshot>;
}
