//! Stable event names and stages for structured logs.

use serde::{Deserialize, Serialize};

/// Log levels as they appear in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Normalizing input and validating parameters.
    Init,
    /// Building requests from windows.
    Build,
    /// Calling the oracle.
    Query,
    /// Writing results into the output series.
    Assemble,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Build => "build",
            Stage::Query => "query",
            Stage::Assemble => "assemble",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names, used as tracing targets.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";
    pub const RUN_FAILED: &str = "run.failed";

    // Scheduling
    pub const WINDOW_DONE: &str = "window.done";
    pub const WINDOW_FAILED: &str = "window.failed";
    pub const BATCH_DONE: &str = "batch.done";

    // Requests and responses
    pub const REQUEST_IRREGULAR_CADENCE: &str = "request.irregular_cadence";
    pub const ASSEMBLE_UNMATCHED: &str = "assemble.unmatched";
    pub const QUERY_DONE: &str = "query.done";
}
