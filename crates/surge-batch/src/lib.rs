//! surge-batch — micro-batch coalescing for write requests.
//!
//! Accepted writes are appended to one live buffer and cut into a batch
//! when either trigger fires first: the buffer reaches its size limit,
//! or its first item reaches the time limit. Both triggers cut under
//! the same lock by swapping in a fresh buffer, so exactly one dispatch
//! fires per buffer and a racing submit lands deterministically in the
//! new one.
//!
//! # Architecture
//!
//! ```text
//! MicrobatchDispatcher
//!   ├── submit() → append; reaching size_limit cuts inline
//!   ├── flusher task → periodic age check; cuts overdue partial buffers
//!   ├── close() → final cut of the partial buffer, exactly once
//!   └── spawned dispatch → DispatchFn(WriteBatch), counted for drained()
//! ```

pub mod dispatcher;

pub use dispatcher::{DispatchFn, DispatchFuture, DispatcherStats, MicrobatchDispatcher, WriteBatch};
