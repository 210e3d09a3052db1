//! Loop window common types and errors.
//!
//! This crate provides the foundational types shared by the config and core
//! crates:
//! - Time-indexed sample tables and channel names
//! - Therapy settings and the engine's enumerations
//! - The unified error type with stable codes

pub mod error;
pub mod series;
pub mod therapy;

pub use error::{Error, ErrorCategory, OracleError, Result, StructuredError};
pub use series::{Channel, SeriesView, TimeSeries};
pub use therapy::{InsulinType, RawTherapySettings, RecommendationType, TargetRange, TherapySettings};
