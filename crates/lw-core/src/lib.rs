//! Loop Window Core Library
//!
//! This library turns a time-indexed insulin/glucose table into requests
//! for an external prediction engine and stitches the answers back into
//! the table:
//! - Record extraction and typed request construction
//! - The oracle capability, its wire binding and a test mock
//! - Lookback-window and overlapping-batch partitioning
//! - Sequential schedulers and response assembly
//! - Top-level pipeline operations and structured logging

pub mod assemble;
pub mod extract;
pub mod logging;
pub mod oracle;
pub mod pipeline;
pub mod request;
pub mod schedule;
pub mod window;
pub mod wire;

pub use oracle::{DoseRecommendation, Oracle, OracleRequest, OracleResponse, QueryKind};
pub use pipeline::{
    add_active_carbs, add_insulin_counteraction_effect, add_insulin_on_board,
    dynamic_carbs_on_board, insulin_percent_effect_remaining, linear_percent_rate,
    percent_absorption_at_percent_time, piecewise_linear_percent_rate, predict_glucose,
    recommend_doses, GlucosePrediction, Outcome, Pipeline,
};
pub use request::{build_request, PredictionRequest, RequestBuilder};
pub use schedule::{RunReport, WindowFailure};
pub use wire::{Transport, WireOracle};
