//! surge-core — shared types and configuration for the surge load core.
//!
//! Everything the other surge crates exchange lives here: the write
//! request and its degraded form, the two collaborator snapshot shapes,
//! admission decisions, rate phases, and the `LoadConfig` that the whole
//! run is constructed from. Configuration is validated once, before any
//! task starts; a config that passes `validate()` cannot fail later.
//!
//! # Architecture
//!
//! ```text
//! LoadConfig (toml)
//!   ├── [rate]      → RateController construction
//!   ├── [admission] → AdmissionGate construction
//!   ├── [batch]     → MicrobatchDispatcher construction
//!   ├── [signal]    → MetricsCache / signal construction
//!   └── [workload]  → request synthesis
//!
//! types
//!   ├── WriteRequest / BatchResult      ← the executor seam
//!   ├── MetricsSnapshot / PoolSnapshot  ← the observation seam
//!   └── AdmissionDecision / RatePhase   ← the control vocabulary
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AdmissionConfig, AdmissionStrategy, BatchConfig, LoadConfig, RateConfig, SignalConfig,
    WorkloadConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use types::{
    AdmissionDecision, BatchResult, MetricsSnapshot, PoolSnapshot, RatePhase, RejectReason,
    WriteRequest,
};
