//! The prediction engine as a capability.
//!
//! Schedulers only see the [`Oracle`] trait. The production binding lives in
//! [`crate::wire`]; a deterministic in-process engine for tests lives in
//! [`mock`].

use chrono::NaiveDateTime;
use lw_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::request::{DynamicCarbsRequest, InsulinEffectRequest, PredictionRequest};

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// What is being asked of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    ActiveInsulin,
    ActiveCarbs,
    DynamicCarbsOnBoard,
    InsulinPercentEffectRemaining,
    PercentAbsorptionAtPercentTime,
    PiecewiseLinearPercentRate,
    LinearPercentRate,
    PredictionDates,
    PredictionValues,
    GlucoseEffectVelocityDates,
    GlucoseEffectVelocityValues,
    GlucoseEffectVelocity,
    DoseRecommendations,
}

impl QueryKind {
    pub const ALL: &'static [QueryKind] = &[
        QueryKind::ActiveInsulin,
        QueryKind::ActiveCarbs,
        QueryKind::DynamicCarbsOnBoard,
        QueryKind::InsulinPercentEffectRemaining,
        QueryKind::PercentAbsorptionAtPercentTime,
        QueryKind::PiecewiseLinearPercentRate,
        QueryKind::LinearPercentRate,
        QueryKind::PredictionDates,
        QueryKind::PredictionValues,
        QueryKind::GlucoseEffectVelocityDates,
        QueryKind::GlucoseEffectVelocityValues,
        QueryKind::GlucoseEffectVelocity,
        QueryKind::DoseRecommendations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::ActiveInsulin => "active_insulin",
            QueryKind::ActiveCarbs => "active_carbs",
            QueryKind::DynamicCarbsOnBoard => "dynamic_carbs_on_board",
            QueryKind::InsulinPercentEffectRemaining => "insulin_percent_effect_remaining",
            QueryKind::PercentAbsorptionAtPercentTime => "percent_absorption_at_percent_time",
            QueryKind::PiecewiseLinearPercentRate => "piecewise_linear_percent_rate",
            QueryKind::LinearPercentRate => "linear_percent_rate",
            QueryKind::PredictionDates => "prediction_dates",
            QueryKind::PredictionValues => "prediction_values",
            QueryKind::GlucoseEffectVelocityDates => "glucose_effect_velocity_dates",
            QueryKind::GlucoseEffectVelocityValues => "glucose_effect_velocity_values",
            QueryKind::GlucoseEffectVelocity => "glucose_effect_velocity",
            QueryKind::DoseRecommendations => "dose_recommendations",
        }
    }

    /// Shape of a well-formed response to this query.
    pub fn shape(&self) -> ResponseShape {
        match self {
            QueryKind::ActiveInsulin
            | QueryKind::ActiveCarbs
            | QueryKind::DynamicCarbsOnBoard
            | QueryKind::InsulinPercentEffectRemaining
            | QueryKind::PercentAbsorptionAtPercentTime
            | QueryKind::PiecewiseLinearPercentRate
            | QueryKind::LinearPercentRate => ResponseShape::Scalar,
            QueryKind::PredictionDates | QueryKind::GlucoseEffectVelocityDates => {
                ResponseShape::Dates
            }
            QueryKind::PredictionValues | QueryKind::GlucoseEffectVelocityValues => {
                ResponseShape::Values
            }
            QueryKind::GlucoseEffectVelocity => ResponseShape::Pairs,
            QueryKind::DoseRecommendations => ResponseShape::Recommendation,
        }
    }

    /// The date-list query that pairs with a value-list query.
    pub fn paired_dates(&self) -> Option<QueryKind> {
        match self {
            QueryKind::PredictionValues => Some(QueryKind::PredictionDates),
            QueryKind::GlucoseEffectVelocityValues => Some(QueryKind::GlucoseEffectVelocityDates),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Scalar,
    Dates,
    Values,
    Pairs,
    Recommendation,
}

impl std::fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResponseShape::Scalar => "scalar",
            ResponseShape::Dates => "dates",
            ResponseShape::Values => "values",
            ResponseShape::Pairs => "pairs",
            ResponseShape::Recommendation => "recommendation",
        };
        write!(f, "{}", s)
    }
}

/// Request payloads accepted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OracleRequest {
    Prediction(PredictionRequest),
    DynamicCarbs(DynamicCarbsRequest),
    InsulinEffect(InsulinEffectRequest),
    /// Fraction of the absorption time elapsed, for the absorption curves.
    PercentTime(f64),
}

impl OracleRequest {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn as_prediction(&self) -> Option<&PredictionRequest> {
        match self {
            OracleRequest::Prediction(request) => Some(request),
            _ => None,
        }
    }
}

/// Structured dose recommendation, passed through as the engine returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoseRecommendation(pub serde_json::Map<String, serde_json::Value>);

impl DoseRecommendation {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}

/// Decoded engine reply.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleResponse {
    Scalar(f64),
    Dates(Vec<NaiveDateTime>),
    Values(Vec<f64>),
    Pairs {
        dates: Vec<NaiveDateTime>,
        values: Vec<f64>,
    },
    /// `None` when the engine has nothing to recommend.
    Recommendation(Option<DoseRecommendation>),
}

impl OracleResponse {
    pub fn shape(&self) -> ResponseShape {
        match self {
            OracleResponse::Scalar(_) => ResponseShape::Scalar,
            OracleResponse::Dates(_) => ResponseShape::Dates,
            OracleResponse::Values(_) => ResponseShape::Values,
            OracleResponse::Pairs { .. } => ResponseShape::Pairs,
            OracleResponse::Recommendation(_) => ResponseShape::Recommendation,
        }
    }

    fn unexpected(&self, kind: QueryKind, expected: ResponseShape) -> Error {
        Error::UnexpectedResponse {
            kind: kind.to_string(),
            expected: expected.to_string(),
            actual: self.shape().to_string(),
        }
    }

    pub fn into_scalar(self, kind: QueryKind) -> Result<f64> {
        match self {
            OracleResponse::Scalar(value) => Ok(value),
            other => Err(other.unexpected(kind, ResponseShape::Scalar)),
        }
    }

    pub fn into_dates(self, kind: QueryKind) -> Result<Vec<NaiveDateTime>> {
        match self {
            OracleResponse::Dates(dates) => Ok(dates),
            other => Err(other.unexpected(kind, ResponseShape::Dates)),
        }
    }

    pub fn into_values(self, kind: QueryKind) -> Result<Vec<f64>> {
        match self {
            OracleResponse::Values(values) => Ok(values),
            other => Err(other.unexpected(kind, ResponseShape::Values)),
        }
    }

    /// Paired dates and values; unequal counts are rejected.
    pub fn into_pairs(self, kind: QueryKind) -> Result<(Vec<NaiveDateTime>, Vec<f64>)> {
        match self {
            OracleResponse::Pairs { dates, values } => {
                if dates.len() != values.len() {
                    return Err(Error::ResponseLengthMismatch {
                        values: values.len(),
                        timestamps: dates.len(),
                    });
                }
                Ok((dates, values))
            }
            other => Err(other.unexpected(kind, ResponseShape::Pairs)),
        }
    }

    pub fn into_recommendation(self, kind: QueryKind) -> Result<Option<DoseRecommendation>> {
        match self {
            OracleResponse::Recommendation(recommendation) => Ok(recommendation),
            other => Err(other.unexpected(kind, ResponseShape::Recommendation)),
        }
    }
}

/// A synchronous, deterministic prediction engine.
///
/// `&mut self` models the single, non-reentrant engine handle: one call is
/// in flight at a time. Implementations do not retry; engine failures come
/// back as [`Error::Oracle`].
pub trait Oracle {
    fn call(&mut self, request: &OracleRequest, kind: QueryKind) -> Result<OracleResponse>;
}

impl<O: Oracle + ?Sized> Oracle for &mut O {
    fn call(&mut self, request: &OracleRequest, kind: QueryKind) -> Result<OracleResponse> {
        (**self).call(request, kind)
    }
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn call(&mut self, request: &OracleRequest, kind: QueryKind) -> Result<OracleResponse> {
        (**self).call(request, kind)
    }
}
