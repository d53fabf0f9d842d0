//! Write executor — the seam between the load loop and whatever absorbs the writes.

use surge_batch::WriteBatch;
use surge_core::BatchResult;

/// Boxed future returned by [`WriteExecutor::execute`].
pub type ExecuteFuture = std::pin::Pin<Box<dyn std::future::Future<Output = BatchResult> + Send>>;

/// Applies one microbatch of writes against the system under load.
///
/// Implementations report per-batch outcomes through [`BatchResult`]; the
/// runner folds those into its metrics and never inspects the writes again.
/// Execution is not retried at this level, a failed write is a failed write.
pub trait WriteExecutor: Send + Sync {
    fn execute(&self, batch: WriteBatch) -> ExecuteFuture;
}
