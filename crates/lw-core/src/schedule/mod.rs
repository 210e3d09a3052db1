//! Sequential drivers that turn partition plans into oracle calls.
//!
//! Both schedulers issue one call at a time against an exclusive oracle and
//! write results into the output series in place. A failure either aborts
//! the run or, under [`FailurePolicy::Isolate`], is recorded in the
//! [`RunReport`] and its positions stay undefined.

pub mod batch;
pub mod lookback;

pub use batch::BatchScheduler;
pub use lookback::LookbackScheduler;

use lw_common::{Channel, Error, Result, StructuredError};
use lw_config::FailurePolicy;
use serde::Serialize;
use std::ops::Range;

use crate::assemble::WriteStats;
use crate::logging::{event_names, Stage};

/// A window or batch that did not produce output.
#[derive(Debug, Clone, Serialize)]
pub struct WindowFailure {
    /// Slice of the series the request was built from.
    pub range: Range<usize>,
    /// Positions left undefined because of the failure.
    pub unwritten: Range<usize>,
    pub error: StructuredError,
}

/// Summary of one scheduler run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub operation: String,
    pub channel: Channel,
    pub policy: FailurePolicy,
    /// Windows or batches attempted.
    pub windows: usize,
    pub writes: WriteStats,
    pub failures: Vec<WindowFailure>,
}

impl RunReport {
    pub fn new(
        run_id: impl Into<String>,
        operation: impl Into<String>,
        channel: Channel,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            operation: operation.into(),
            channel,
            policy,
            windows: 0,
            writes: WriteStats::default(),
            failures: Vec::new(),
        }
    }

    /// Whether every window produced output.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","run_id":"{}"}}"#,
                self.run_id
            )
        })
    }

    /// Abort with `err` or record it, depending on the policy.
    pub(crate) fn fail(
        &mut self,
        range: Range<usize>,
        unwritten: Range<usize>,
        err: Error,
    ) -> Result<()> {
        if self.policy == FailurePolicy::Abort {
            return Err(err);
        }

        tracing::warn!(
            target: event_names::WINDOW_FAILED,
            stage = %Stage::Query,
            start = range.start,
            end = range.end,
            code = err.code(),
            error = %err,
            "window failed; positions left undefined"
        );
        let error = StructuredError::from(&err)
            .with_context("start", range.start)
            .with_context("end", range.end);
        self.failures.push(WindowFailure {
            range,
            unwritten,
            error,
        });
        Ok(())
    }
}
