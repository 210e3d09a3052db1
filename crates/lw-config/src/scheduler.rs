//! Window and batch scheduling parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sampling interval the request builder assumes, in seconds.
pub const SAMPLE_INTERVAL_SECONDS: i64 = 300;

/// What to do when one window or batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The first failure aborts the whole run (no partial results).
    #[default]
    Abort,
    /// Record the failure, leave its positions undefined and continue.
    Isolate,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" | "fail-fast" | "strict" => Ok(FailurePolicy::Abort),
            "isolate" | "continue" | "partial" => Ok(FailurePolicy::Isolate),
            _ => Err(format!("unknown failure policy: {}", s)),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Isolate => write!(f, "isolate"),
        }
    }
}

/// How strictly to enforce the fixed 5-minute sampling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CadenceCheck {
    /// Do not inspect sample spacing.
    Ignore,
    /// Log a warning when a window contains irregular spacing.
    #[default]
    Warn,
    /// Reject windows with irregular spacing.
    Strict,
}

impl std::str::FromStr for CadenceCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" | "off" => Ok(CadenceCheck::Ignore),
            "warn" | "warning" => Ok(CadenceCheck::Warn),
            "strict" | "error" => Ok(CadenceCheck::Strict),
            _ => Err(format!("unknown cadence check: {}", s)),
        }
    }
}

/// Parameters for the lookback and batch schedulers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Trailing window length (samples) for scalar queries.
    pub lookback: usize,
    /// Samples per overlapping batch.
    pub batch_size: usize,
    /// Leading samples of each batch whose outputs are discarded.
    pub overlap: usize,
    pub failure_policy: FailurePolicy,
    pub cadence_check: CadenceCheck,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookback: 72,
            batch_size: 300,
            overlap: 72,
            failure_policy: FailurePolicy::Abort,
            cadence_check: CadenceCheck::Warn,
        }
    }
}

impl SchedulerConfig {
    /// Distance between consecutive batch starts.
    pub fn step(&self) -> usize {
        self.batch_size.saturating_sub(self.overlap)
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_batches(mut self, batch_size: usize, overlap: usize) -> Self {
        self.batch_size = batch_size;
        self.overlap = overlap;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_cadence_check(mut self, cadence_check: CadenceCheck) -> Self {
        self.cadence_check = cadence_check;
        self
    }
}
