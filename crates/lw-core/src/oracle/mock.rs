//! Deterministic in-process oracle for tests.
//!
//! The models here are crude stand-ins chosen so that scheduling properties
//! are easy to assert: active insulin decays linearly over the action
//! duration, and effect velocity depends only on the timestamp, so
//! overlapping batches always agree.
//!
//! ```ignore
//! use lw_core::oracle::mock::MockOracle;
//!
//! let mut oracle = MockOracle::new().fail_on_call(3);
//! ```

use chrono::{Duration, NaiveDateTime};
use lw_common::{Error, OracleError, Result};

use super::{DoseRecommendation, Oracle, OracleRequest, OracleResponse, QueryKind};
use crate::request::{DoseType, PredictionRequest, SAMPLES_PER_HOUR};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: QueryKind,
    pub request: OracleRequest,
}

/// Scripted oracle with call recording and failure injection.
#[derive(Debug, Clone)]
pub struct MockOracle {
    calls: Vec<RecordedCall>,
    fail_on_call: Option<usize>,
    drop_last_pair_value: bool,
    action_duration: Duration,
    prediction_horizon: usize,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            fail_on_call: None,
            drop_last_pair_value: false,
            action_duration: Duration::minutes(360),
            prediction_horizon: 72,
        }
    }

    /// Fail the call with this zero-based sequence number.
    pub fn fail_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Return one value fewer than dates in paired responses.
    pub fn with_mismatched_pairs(mut self) -> Self {
        self.drop_last_pair_value = true;
        self
    }

    pub fn with_action_duration(mut self, action_duration: Duration) -> Self {
        self.action_duration = action_duration;
        self
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Prediction requests received for `kind`, in call order.
    pub fn prediction_requests(&self, kind: QueryKind) -> Vec<&PredictionRequest> {
        self.calls
            .iter()
            .filter(|call| call.kind == kind)
            .filter_map(|call| call.request.as_prediction())
            .collect()
    }

    /// Effect velocity the mock reports for `ts`.
    pub fn velocity_at(ts: NaiveDateTime) -> f64 {
        let slot = ts.and_utc().timestamp().div_euclid(300);
        (slot.rem_euclid(97) as f64 - 48.0) * 0.001
    }

    fn active_insulin(&self, request: &PredictionRequest) -> f64 {
        let scheduled =
            request.basal.first().map(|b| b.value).unwrap_or(0.0) / SAMPLES_PER_HOUR;
        request
            .doses
            .iter()
            .filter(|dose| dose.start_date <= request.prediction_start)
            .map(|dose| {
                let net = match dose.dose_type {
                    DoseType::Bolus => dose.volume,
                    DoseType::Basal => dose.volume - scheduled,
                };
                net * self.remaining(request.prediction_start - dose.start_date)
            })
            .sum()
    }

    fn active_carbs(request: &PredictionRequest) -> f64 {
        request
            .carb_entries
            .iter()
            .filter(|entry| entry.date <= request.prediction_start)
            .map(|entry| {
                let elapsed = (request.prediction_start - entry.date).num_seconds() as f64;
                entry.grams * (1.0 - elapsed / entry.absorption_time).max(0.0)
            })
            .sum()
    }

    fn remaining(&self, elapsed: Duration) -> f64 {
        let fraction = elapsed.num_seconds() as f64 / self.action_duration.num_seconds() as f64;
        (1.0 - fraction).clamp(0.0, 1.0)
    }

    fn velocity(request: &PredictionRequest) -> (Vec<NaiveDateTime>, Vec<f64>) {
        let dates: Vec<_> = request.glucose_history.iter().map(|g| g.date).collect();
        let values = dates.iter().map(|ts| Self::velocity_at(*ts)).collect();
        (dates, values)
    }

    fn prediction(&self, request: &PredictionRequest) -> (Vec<NaiveDateTime>, Vec<f64>) {
        let last = request.glucose_history.last().map(|g| g.value).unwrap_or(0.0);
        let isf = request.sensitivity.first().map(|s| s.value).unwrap_or(0.0);
        let drop = self.active_insulin(request) * isf;
        let steps = self.prediction_horizon;
        (0..=steps)
            .map(|k| {
                let ts = request.prediction_start + Duration::minutes(5 * k as i64);
                (ts, last - drop * k as f64 / steps as f64)
            })
            .unzip()
    }

    fn recommendation(request: &PredictionRequest) -> Option<DoseRecommendation> {
        let glucose = request.glucose_history.last()?.value;
        let target = request.target.first()?;
        if glucose <= target.upper_bound {
            return None;
        }
        let isf = request.sensitivity.first()?.value;
        let amount = ((glucose - target.upper_bound) / isf).min(request.max_bolus);

        let mut fields = serde_json::Map::new();
        fields.insert("amount".to_string(), serde_json::json!(amount));
        fields.insert(
            "type".to_string(),
            serde_json::json!(request.recommendation_type.as_str()),
        );
        Some(DoseRecommendation(fields))
    }

    fn respond(&self, request: &OracleRequest, kind: QueryKind) -> Result<OracleResponse> {
        let expect_prediction = || {
            request.as_prediction().ok_or_else(|| {
                Error::Oracle(OracleError::new(kind.as_str(), "expected a prediction request"))
            })
        };

        let response = match kind {
            QueryKind::ActiveInsulin => {
                OracleResponse::Scalar(self.active_insulin(expect_prediction()?))
            }
            QueryKind::ActiveCarbs => {
                OracleResponse::Scalar(Self::active_carbs(expect_prediction()?))
            }
            QueryKind::GlucoseEffectVelocity => {
                let (dates, mut values) = Self::velocity(expect_prediction()?);
                if self.drop_last_pair_value {
                    values.pop();
                }
                OracleResponse::Pairs { dates, values }
            }
            QueryKind::GlucoseEffectVelocityDates => {
                OracleResponse::Dates(Self::velocity(expect_prediction()?).0)
            }
            QueryKind::GlucoseEffectVelocityValues => {
                OracleResponse::Values(Self::velocity(expect_prediction()?).1)
            }
            QueryKind::PredictionDates => {
                OracleResponse::Dates(self.prediction(expect_prediction()?).0)
            }
            QueryKind::PredictionValues => {
                OracleResponse::Values(self.prediction(expect_prediction()?).1)
            }
            QueryKind::DoseRecommendations => {
                OracleResponse::Recommendation(Self::recommendation(expect_prediction()?))
            }
            QueryKind::DynamicCarbsOnBoard => match request {
                OracleRequest::DynamicCarbs(req) => {
                    let grams: f64 = req.carb_entries.iter().map(|c| c.grams).sum();
                    let absorbed: f64 = req
                        .input_ice
                        .iter()
                        .map(|ice| {
                            let seconds = (ice.end_at - ice.start_at).num_seconds() as f64;
                            ice.velocity.max(0.0) * seconds * req.carb_ratio / req.sensitivity
                        })
                        .sum();
                    OracleResponse::Scalar((grams - absorbed).max(0.0))
                }
                _ => return Err(mismatched(kind)),
            },
            QueryKind::InsulinPercentEffectRemaining => match request {
                OracleRequest::InsulinEffect(req) => {
                    let active = (req.minutes - req.delay).max(0.0);
                    OracleResponse::Scalar((1.0 - active / req.action_duration).clamp(0.0, 1.0))
                }
                _ => return Err(mismatched(kind)),
            },
            QueryKind::PercentAbsorptionAtPercentTime
            | QueryKind::PiecewiseLinearPercentRate
            | QueryKind::LinearPercentRate => match request {
                OracleRequest::PercentTime(t) => OracleResponse::Scalar(curve(kind, *t)),
                _ => return Err(mismatched(kind)),
            },
        };
        Ok(response)
    }
}

fn mismatched(kind: QueryKind) -> Error {
    Error::Oracle(OracleError::new(kind.as_str(), "request type does not match query"))
}

fn curve(kind: QueryKind, t: f64) -> f64 {
    match kind {
        QueryKind::PercentAbsorptionAtPercentTime => {
            if t <= 0.0 {
                0.0
            } else if t <= 0.5 {
                2.0 * t * t
            } else if t < 1.0 {
                -1.0 + 2.0 * t * (2.0 - t)
            } else {
                1.0
            }
        }
        QueryKind::PiecewiseLinearPercentRate => {
            if t <= 0.0 || t >= 1.0 {
                0.0
            } else if t <= 0.5 {
                4.0 * t
            } else {
                4.0 - 4.0 * t
            }
        }
        _ => {
            if t > 0.0 && t <= 1.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

impl Oracle for MockOracle {
    fn call(&mut self, request: &OracleRequest, kind: QueryKind) -> Result<OracleResponse> {
        let sequence = self.calls.len();
        self.calls.push(RecordedCall {
            kind,
            request: request.clone(),
        });

        if self.fail_on_call == Some(sequence) {
            return Err(Error::Oracle(OracleError::new(
                kind.as_str(),
                format!("injected failure on call {sequence}"),
            )));
        }

        self.respond(request, kind)
    }
}
