//! Load-run configuration.
//!
//! Parsed from TOML into nested sections, with defaults matching the
//! reference deployment. `validate()` is the single gate: every
//! constraint that could make the loop misbehave is rejected here,
//! before any task starts.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// ── Sections ──────────────────────────────────────────────────────

/// Top-level configuration for one load run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub rate: RateConfig,
    pub admission: AdmissionConfig,
    pub batch: BatchConfig,
    pub signal: SignalConfig,
    pub workload: WorkloadConfig,
}

/// Rate controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Starting target rate. Zero is valid; the controller ramps up
    /// from it on the first tick.
    pub initial_tps: f64,
    pub min_tps: f64,
    pub max_tps: f64,
    /// Additive ramp-up step per tick.
    pub step_tps: f64,
    /// Multiplicative ramp-down factor, in (0, 1).
    pub decrease_factor: f64,
    /// Control tick cadence.
    pub step_duration_ms: u64,
    /// Hold time after a ramp before the next step is allowed.
    pub cooldown_ms: u64,
    /// Consecutive stable ticks before the run counts as converged.
    pub stability_window: u32,
    /// Failure rate above which ramp-up is blocked.
    pub max_failure_rate: f64,
    /// Backpressure at or above this forces ramp-down.
    pub high_watermark: f64,
    /// Backpressure below this allows ramp-up.
    pub low_watermark: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            initial_tps: 0.0,
            min_tps: 0.0,
            max_tps: 1000.0,
            step_tps: 25.0,
            decrease_factor: 0.5,
            step_duration_ms: 1000,
            cooldown_ms: 2000,
            stability_window: 5,
            max_failure_rate: 0.05,
            high_watermark: 0.7,
            low_watermark: 0.3,
        }
    }
}

impl RateConfig {
    pub fn step_duration(&self) -> Duration {
        Duration::from_millis(self.step_duration_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Which policy the admission gate applies when the score crosses its
/// threshold. Exactly one strategy is active per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStrategy {
    /// Hard cutoff at a single threshold. The simplest and most
    /// predictable policy, and therefore the default.
    #[default]
    Threshold,
    /// Graded ladder: reject above `reject_threshold`, silently drop
    /// above `drop_threshold`.
    Drop,
    /// Explicit rejection above `reject_threshold`.
    Reject,
    /// Ask callers to resubmit after a score-derived backoff.
    Retry,
    /// Forward with a reduced payload instead of rejecting.
    Degrade,
}

impl std::fmt::Display for AdmissionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdmissionStrategy::Threshold => "threshold",
            AdmissionStrategy::Drop => "drop",
            AdmissionStrategy::Reject => "reject",
            AdmissionStrategy::Retry => "retry",
            AdmissionStrategy::Degrade => "degrade",
        };
        write!(f, "{name}")
    }
}

/// Admission gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub strategy: AdmissionStrategy,
    /// Cutoff for the `threshold` strategy.
    pub threshold: f64,
    pub reject_threshold: f64,
    pub drop_threshold: f64,
    /// Base backoff handed out right at the reject threshold.
    pub retry_base_ms: u64,
    /// How many times the backoff doubles across the overshoot range.
    pub retry_doublings: u32,
    pub retry_max_ms: u64,
    /// Resubmission budget per request before it counts as rejected.
    pub max_retry_attempts: u32,
    /// Payload fraction kept by the `degrade` strategy, in (0, 1].
    pub degrade_factor: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            strategy: AdmissionStrategy::Threshold,
            threshold: 0.7,
            reject_threshold: 0.7,
            drop_threshold: 0.9,
            retry_base_ms: 25,
            retry_doublings: 8,
            retry_max_ms: 5000,
            max_retry_attempts: 3,
            degrade_factor: 0.5,
        }
    }
}

impl AdmissionConfig {
    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

/// Micro-batch dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Dispatch as soon as a buffer holds this many items.
    pub size_limit: usize,
    /// Dispatch a partial buffer once its first item is this old.
    pub time_limit_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_limit: 50,
            time_limit_ms: 50,
        }
    }
}

impl BatchConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

/// Backpressure signal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// How long a metrics snapshot stays fresh.
    pub cache_ttl_ms: u64,
    /// Queue depth that counts as full pressure.
    pub queue_capacity: u64,
    /// Waiting threads that count as full pool pressure.
    pub awaiting_norm: u32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 100,
            queue_capacity: 1000,
            awaiting_norm: 10,
        }
    }
}

impl SignalConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Synthetic request shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Payload size of each generated write.
    pub payload_bytes: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self { payload_bytes: 256 }
    }
}

// ── Loading and validation ────────────────────────────────────────

impl LoadConfig {
    /// Parse and validate a TOML config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML config content.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: LoadConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject any setting that would make the loop misbehave.
    pub fn validate(&self) -> ConfigResult<()> {
        let r = &self.rate;
        if !r.min_tps.is_finite() || r.min_tps < 0.0 {
            return Err(ConfigError::InvalidRate(format!(
                "min_tps must be finite and non-negative, got {}",
                r.min_tps
            )));
        }
        if !r.max_tps.is_finite() || r.max_tps < r.min_tps {
            return Err(ConfigError::InvalidRate(format!(
                "max_tps ({}) must be at least min_tps ({})",
                r.max_tps, r.min_tps
            )));
        }
        if !r.initial_tps.is_finite() || r.initial_tps < r.min_tps || r.initial_tps > r.max_tps {
            return Err(ConfigError::InvalidRate(format!(
                "initial_tps ({}) must lie within [{}, {}]",
                r.initial_tps, r.min_tps, r.max_tps
            )));
        }
        if !r.step_tps.is_finite() || r.step_tps <= 0.0 {
            return Err(ConfigError::InvalidRate(format!(
                "step_tps must be positive, got {}",
                r.step_tps
            )));
        }
        if !r.decrease_factor.is_finite() || r.decrease_factor <= 0.0 || r.decrease_factor >= 1.0 {
            return Err(ConfigError::InvalidRate(format!(
                "decrease_factor must be in (0, 1), got {}",
                r.decrease_factor
            )));
        }
        if r.step_duration_ms == 0 {
            return Err(ConfigError::InvalidRate(
                "step_duration_ms must be nonzero".to_string(),
            ));
        }
        if r.stability_window == 0 {
            return Err(ConfigError::InvalidRate(
                "stability_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&r.max_failure_rate) {
            return Err(ConfigError::InvalidRate(format!(
                "max_failure_rate must be in [0, 1], got {}",
                r.max_failure_rate
            )));
        }
        if !(0.0..=1.0).contains(&r.low_watermark) || !(0.0..=1.0).contains(&r.high_watermark) {
            return Err(ConfigError::InvalidWatermark(format!(
                "watermarks must be in [0, 1], got low={} high={}",
                r.low_watermark, r.high_watermark
            )));
        }
        if r.low_watermark >= r.high_watermark {
            return Err(ConfigError::InvalidWatermark(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                r.low_watermark, r.high_watermark
            )));
        }

        let a = &self.admission;
        for (name, value) in [
            ("threshold", a.threshold),
            ("reject_threshold", a.reject_threshold),
            ("drop_threshold", a.drop_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidAdmission(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if a.drop_threshold < a.reject_threshold {
            return Err(ConfigError::InvalidAdmission(format!(
                "drop_threshold ({}) must be at least reject_threshold ({})",
                a.drop_threshold, a.reject_threshold
            )));
        }
        if a.retry_base_ms == 0 || a.retry_max_ms < a.retry_base_ms {
            return Err(ConfigError::InvalidAdmission(format!(
                "retry backoff range [{}, {}] ms is empty",
                a.retry_base_ms, a.retry_max_ms
            )));
        }
        if !a.degrade_factor.is_finite() || a.degrade_factor <= 0.0 || a.degrade_factor > 1.0 {
            return Err(ConfigError::InvalidAdmission(format!(
                "degrade_factor must be in (0, 1], got {}",
                a.degrade_factor
            )));
        }

        if self.batch.size_limit == 0 {
            return Err(ConfigError::InvalidBatch(
                "size_limit must be nonzero".to_string(),
            ));
        }
        if self.batch.time_limit_ms == 0 {
            return Err(ConfigError::InvalidBatch(
                "time_limit_ms must be nonzero".to_string(),
            ));
        }

        if self.signal.queue_capacity == 0 {
            return Err(ConfigError::InvalidSignal(
                "queue_capacity must be nonzero".to_string(),
            ));
        }
        if self.signal.awaiting_norm == 0 {
            return Err(ConfigError::InvalidSignal(
                "awaiting_norm must be nonzero".to_string(),
            ));
        }

        Ok(())
    }
}
