//! Error types for loop-window.
//!
//! Every failure in the windowing pipeline maps onto one [`Error`] variant
//! with:
//! - A stable numeric code for machine parsing
//! - A category for grouping
//! - A recoverability hint
//!
//! # Structured Output
//!
//! Errors serialize to structured JSON through [`StructuredError`]:
//! ```json
//! {
//!   "code": 30,
//!   "category": "response",
//!   "message": "oracle returned 12 values for 11 timestamps",
//!   "recoverable": false,
//!   "context": { "values": 12, "timestamps": 11 }
//! }
//! ```
//!
//! Oracle failures are opaque: they are wrapped in [`Error::Oracle`] without
//! translation so callers see exactly what the prediction engine reported.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for loop-window operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Settings, enumerations and scheduler parameters.
    Config,
    /// Problems with the caller-supplied time series.
    Input,
    /// Oracle responses that do not have the expected shape.
    Response,
    /// Failures reported by the oracle itself.
    Oracle,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Response => write!(f, "response"),
            ErrorCategory::Oracle => write!(f, "oracle"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Opaque failure raised by an oracle implementation.
///
/// The core never inspects or retries these; `query` names the query kind
/// (or native symbol) that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("oracle query {query} failed: {message}")]
pub struct OracleError {
    pub query: String,
    pub message: String,
}

impl OracleError {
    pub fn new(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            message: message.into(),
        }
    }
}

/// Unified error type for loop-window.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("invalid {field}: {value:?} is not one of {allowed}")]
    InvalidEnum {
        field: &'static str,
        value: String,
        allowed: String,
    },

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    // Input errors (20-29)
    #[error("required channel {channel} is absent from the series")]
    ChannelAbsent { channel: String },

    #[error("cannot build a request from an empty window")]
    EmptyWindow,

    #[error("irregular sampling at {at}: gap of {gap_seconds}s, expected {expected_seconds}s")]
    IrregularCadence {
        at: NaiveDateTime,
        gap_seconds: i64,
        expected_seconds: i64,
    },

    // Response errors (30-39)
    #[error("oracle returned {values} values for {timestamps} timestamps")]
    ResponseLengthMismatch { values: usize, timestamps: usize },

    #[error("oracle query {kind} expected a {expected} response, got {actual}")]
    UnexpectedResponse {
        kind: String,
        expected: String,
        actual: String,
    },

    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),

    // Oracle errors (40-49)
    #[error(transparent)]
    Oracle(#[from] OracleError),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Input errors
    /// - 30-39: Response errors
    /// - 40-49: Oracle errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidEnum { .. } => 10,
            Error::InvalidParameter { .. } => 11,
            Error::Config(_) => 12,
            Error::ChannelAbsent { .. } => 20,
            Error::EmptyWindow => 21,
            Error::IrregularCadence { .. } => 22,
            Error::ResponseLengthMismatch { .. } => 30,
            Error::UnexpectedResponse { .. } => 31,
            Error::MalformedResponse(_) => 32,
            Error::Oracle(_) => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEnum { .. } | Error::InvalidParameter { .. } | Error::Config(_) => {
                ErrorCategory::Config
            }

            Error::ChannelAbsent { .. } | Error::EmptyWindow | Error::IrregularCadence { .. } => {
                ErrorCategory::Input
            }

            Error::ResponseLengthMismatch { .. }
            | Error::UnexpectedResponse { .. }
            | Error::MalformedResponse(_) => ErrorCategory::Response,

            Error::Oracle(_) => ErrorCategory::Oracle,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether fixing the inputs (settings, series) can resolve the error.
    ///
    /// Response and oracle errors are not recoverable from the caller's side:
    /// the engine is deterministic, so re-issuing the same call fails again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::InvalidEnum { .. } => true,
            Error::InvalidParameter { .. } => true,
            Error::Config(_) => true,

            Error::ChannelAbsent { .. } => true,
            Error::EmptyWindow => true,
            Error::IrregularCadence { .. } => true,

            Error::ResponseLengthMismatch { .. } => false,
            Error::UnexpectedResponse { .. } => false,
            Error::MalformedResponse(_) => false,

            Error::Oracle(_) => false,

            Error::Io(_) => true,
            Error::Json(_) => true,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::InvalidEnum { .. } => "Invalid Enumeration Value",
            Error::InvalidParameter { .. } => "Invalid Parameter",
            Error::Config(_) => "Configuration Error",
            Error::ChannelAbsent { .. } => "Missing Channel",
            Error::EmptyWindow => "Empty Window",
            Error::IrregularCadence { .. } => "Irregular Sampling Cadence",
            Error::ResponseLengthMismatch { .. } => "Response Length Mismatch",
            Error::UnexpectedResponse { .. } => "Unexpected Response Shape",
            Error::MalformedResponse(_) => "Malformed Response",
            Error::Oracle(_) => "Oracle Failure",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
        }
    }

    /// Helper for invalid parameter errors.
    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Structured error record for JSON output and run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::InvalidEnum { field, value, .. } => {
                context.insert("field".to_string(), serde_json::json!(field));
                context.insert("value".to_string(), serde_json::json!(value));
            }
            Error::ChannelAbsent { channel } => {
                context.insert("channel".to_string(), serde_json::json!(channel));
            }
            Error::ResponseLengthMismatch { values, timestamps } => {
                context.insert("values".to_string(), serde_json::json!(values));
                context.insert("timestamps".to_string(), serde_json::json!(timestamps));
            }
            Error::Oracle(oracle) => {
                context.insert("query".to_string(), serde_json::json!(oracle.query));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
