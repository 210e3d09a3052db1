//! Top-level operations: derived channels and whole-series queries.
//!
//! Every operation normalizes its input, runs inside a `run` span with a
//! fresh run ID, and leaves the caller's series untouched. Scheduled
//! operations return an [`Outcome`] carrying the augmented copy and the
//! [`RunReport`].

use chrono::NaiveDateTime;
use lw_common::{
    Channel, Error, InsulinType, RawTherapySettings, Result, TherapySettings, TimeSeries,
};
use lw_config::{
    validate_scheduler, ConfigError, ResolvedConfig, SchedulerConfig, ValidationError,
};
use serde::Serialize;

use crate::logging::{event_names, generate_run_id, Stage};
use crate::oracle::{DoseRecommendation, Oracle, OracleRequest, QueryKind};
use crate::request::{InsulinEffectRequest, RequestBuilder};
use crate::schedule::{BatchScheduler, LookbackScheduler, RunReport};

/// Augmented series plus the run summary.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub series: TimeSeries,
    pub report: RunReport,
}

/// Predicted glucose curve starting at the last sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlucosePrediction {
    pub dates: Vec<NaiveDateTime>,
    pub values: Vec<f64>,
}

impl GlucosePrediction {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Plan {
    Lookback,
    Batch,
}

/// Therapy settings and scheduler parameters for a sequence of runs.
#[derive(Debug, Clone)]
pub struct Pipeline {
    builder: RequestBuilder,
    scheduler: SchedulerConfig,
}

impl Pipeline {
    pub fn new(settings: TherapySettings) -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            builder: RequestBuilder::new(settings).with_cadence_check(scheduler.cadence_check),
            scheduler,
        }
    }

    /// Validate untyped settings before anything reaches the oracle.
    pub fn from_raw(raw: &RawTherapySettings) -> Result<Self> {
        Ok(Self::new(TherapySettings::from_raw(raw)?))
    }

    /// Therapy and scheduler sections of a loaded config.
    pub fn from_config(resolved: &ResolvedConfig) -> Result<Self> {
        let settings = resolved.therapy().map_err(config_error)?;
        Ok(Self::new(settings).with_scheduler(resolved.scheduler().clone()))
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.builder = self.builder.with_cadence_check(scheduler.cadence_check);
        self.scheduler = scheduler;
        self
    }

    /// Replace the request builder, e.g. to enable optional request flags.
    ///
    /// The scheduler's cadence check still applies to the new builder.
    pub fn with_builder(mut self, builder: RequestBuilder) -> Self {
        self.builder = builder.with_cadence_check(self.scheduler.cadence_check);
        self
    }

    pub fn settings(&self) -> &TherapySettings {
        self.builder.settings()
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.scheduler
    }

    /// Add the `iob` channel: one trailing-window query per position.
    pub fn add_insulin_on_board<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        oracle: &mut O,
    ) -> Result<Outcome> {
        self.schedule(
            series,
            "insulin_on_board",
            QueryKind::ActiveInsulin,
            Channel::Iob,
            Plan::Lookback,
            oracle,
        )
    }

    /// Add the `cob` channel: one trailing-window query per position.
    pub fn add_active_carbs<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        oracle: &mut O,
    ) -> Result<Outcome> {
        self.schedule(
            series,
            "active_carbs",
            QueryKind::ActiveCarbs,
            Channel::Cob,
            Plan::Lookback,
            oracle,
        )
    }

    /// Add the `ice` channel from overlapping batch queries.
    pub fn add_insulin_counteraction_effect<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        oracle: &mut O,
    ) -> Result<Outcome> {
        self.schedule(
            series,
            "insulin_counteraction_effect",
            QueryKind::GlucoseEffectVelocity,
            Channel::Ice,
            Plan::Batch,
            oracle,
        )
    }

    /// Predict glucose from the whole series, starting at its last sample.
    pub fn predict_glucose<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        oracle: &mut O,
    ) -> Result<GlucosePrediction> {
        traced("predict_glucose", |_| {
            let request = self.whole_series_request(series)?;
            let dates = oracle
                .call(&request, QueryKind::PredictionDates)?
                .into_dates(QueryKind::PredictionDates)?;
            let values = oracle
                .call(&request, QueryKind::PredictionValues)?
                .into_values(QueryKind::PredictionValues)?;
            if dates.len() != values.len() {
                return Err(Error::ResponseLengthMismatch {
                    values: values.len(),
                    timestamps: dates.len(),
                });
            }
            tracing::debug!(
                target: event_names::QUERY_DONE,
                stage = %Stage::Query,
                points = dates.len(),
                "prediction received"
            );
            Ok(GlucosePrediction { dates, values })
        })
    }

    /// Dose recommendation for the last sample, if the engine makes one.
    pub fn recommend_doses<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        oracle: &mut O,
    ) -> Result<Option<DoseRecommendation>> {
        traced("recommend_doses", |_| {
            let request = self.whole_series_request(series)?;
            let recommendation = oracle
                .call(&request, QueryKind::DoseRecommendations)?
                .into_recommendation(QueryKind::DoseRecommendations)?;
            tracing::debug!(
                target: event_names::QUERY_DONE,
                stage = %Stage::Query,
                recommended = recommendation.is_some(),
                "recommendation received"
            );
            Ok(recommendation)
        })
    }

    /// Carbs on board estimated from the `ice` and `carbs` channels.
    pub fn dynamic_carbs_on_board<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        oracle: &mut O,
    ) -> Result<f64> {
        traced("dynamic_carbs_on_board", |_| {
            let normalized = series.normalized();
            let request = self.builder.build_dynamic_carbs(&normalized.view())?;
            oracle
                .call(
                    &OracleRequest::DynamicCarbs(request),
                    QueryKind::DynamicCarbsOnBoard,
                )?
                .into_scalar(QueryKind::DynamicCarbsOnBoard)
        })
    }

    fn whole_series_request(&self, series: &TimeSeries) -> Result<OracleRequest> {
        let normalized = series.normalized();
        let last = normalized.index().last().copied().ok_or(Error::EmptyWindow)?;
        let request = self.builder.build(&normalized.view(), last)?;
        Ok(OracleRequest::Prediction(request))
    }

    fn schedule<O: Oracle + ?Sized>(
        &self,
        series: &TimeSeries,
        operation: &str,
        kind: QueryKind,
        channel: Channel,
        plan: Plan,
        oracle: &mut O,
    ) -> Result<Outcome> {
        validate_scheduler(&self.scheduler).map_err(validation_error)?;

        traced(operation, |run_id| {
            let mut output = series.normalized();
            let mut report =
                RunReport::new(run_id, operation, channel, self.scheduler.failure_policy);

            match plan {
                Plan::Lookback => LookbackScheduler::new(&self.builder, &self.scheduler).run(
                    &mut output,
                    kind,
                    channel,
                    oracle,
                    &mut report,
                )?,
                Plan::Batch => BatchScheduler::new(&self.builder, &self.scheduler).run(
                    &mut output,
                    kind,
                    channel,
                    oracle,
                    &mut report,
                )?,
            }

            tracing::info!(
                target: event_names::QUERY_DONE,
                stage = %Stage::Assemble,
                channel = %channel,
                windows = report.windows,
                written = report.writes.written,
                failures = report.failures.len(),
                "channel assembled"
            );
            Ok(Outcome {
                series: output,
                report,
            })
        })
    }
}

/// Run `f` inside a `run` span, logging start and outcome.
fn traced<T>(operation: &str, f: impl FnOnce(&str) -> Result<T>) -> Result<T> {
    let run_id = generate_run_id();
    let span = tracing::info_span!("run", run_id = %run_id, operation);
    let _guard = span.enter();

    tracing::info!(target: event_names::RUN_STARTED, stage = %Stage::Init, "run started");
    match f(&run_id) {
        Ok(value) => {
            tracing::info!(target: event_names::RUN_FINISHED, "run finished");
            Ok(value)
        }
        Err(err) => {
            tracing::error!(
                target: event_names::RUN_FAILED,
                code = err.code(),
                error = %err,
                "run failed"
            );
            Err(err)
        }
    }
}

fn validation_error(err: ValidationError) -> Error {
    match err {
        ValidationError::InvalidValue { field, message } => Error::InvalidParameter {
            name: field,
            message,
        },
        ValidationError::Settings(inner) => inner,
        other => Error::Config(other.to_string()),
    }
}

fn config_error(err: ConfigError) -> Error {
    match err {
        ConfigError::Validation(inner) => validation_error(inner),
        other => Error::Config(other.to_string()),
    }
}

/// Series with an `iob` channel added. See [`Pipeline::add_insulin_on_board`].
pub fn add_insulin_on_board<O: Oracle + ?Sized>(
    series: &TimeSeries,
    settings: &TherapySettings,
    scheduler: &SchedulerConfig,
    oracle: &mut O,
) -> Result<Outcome> {
    Pipeline::new(settings.clone())
        .with_scheduler(scheduler.clone())
        .add_insulin_on_board(series, oracle)
}

pub fn add_active_carbs<O: Oracle + ?Sized>(
    series: &TimeSeries,
    settings: &TherapySettings,
    scheduler: &SchedulerConfig,
    oracle: &mut O,
) -> Result<Outcome> {
    Pipeline::new(settings.clone())
        .with_scheduler(scheduler.clone())
        .add_active_carbs(series, oracle)
}

pub fn add_insulin_counteraction_effect<O: Oracle + ?Sized>(
    series: &TimeSeries,
    settings: &TherapySettings,
    scheduler: &SchedulerConfig,
    oracle: &mut O,
) -> Result<Outcome> {
    Pipeline::new(settings.clone())
        .with_scheduler(scheduler.clone())
        .add_insulin_counteraction_effect(series, oracle)
}

pub fn predict_glucose<O: Oracle + ?Sized>(
    series: &TimeSeries,
    settings: &TherapySettings,
    oracle: &mut O,
) -> Result<GlucosePrediction> {
    Pipeline::new(settings.clone()).predict_glucose(series, oracle)
}

pub fn recommend_doses<O: Oracle + ?Sized>(
    series: &TimeSeries,
    settings: &TherapySettings,
    oracle: &mut O,
) -> Result<Option<DoseRecommendation>> {
    Pipeline::new(settings.clone()).recommend_doses(series, oracle)
}

pub fn dynamic_carbs_on_board<O: Oracle + ?Sized>(
    series: &TimeSeries,
    settings: &TherapySettings,
    oracle: &mut O,
) -> Result<f64> {
    Pipeline::new(settings.clone()).dynamic_carbs_on_board(series, oracle)
}

/// Fraction of a unit dose's effect remaining after `minutes`.
pub fn insulin_percent_effect_remaining<O: Oracle + ?Sized>(
    insulin_type: InsulinType,
    minutes: f64,
    oracle: &mut O,
) -> Result<f64> {
    if !minutes.is_finite() {
        return Err(Error::invalid_parameter("minutes", "must be finite"));
    }
    let request = OracleRequest::InsulinEffect(InsulinEffectRequest::for_insulin(
        insulin_type,
        minutes,
    ));
    oracle
        .call(&request, QueryKind::InsulinPercentEffectRemaining)?
        .into_scalar(QueryKind::InsulinPercentEffectRemaining)
}

pub fn percent_absorption_at_percent_time<O: Oracle + ?Sized>(
    percent_time: f64,
    oracle: &mut O,
) -> Result<f64> {
    percent_curve(QueryKind::PercentAbsorptionAtPercentTime, percent_time, oracle)
}

pub fn piecewise_linear_percent_rate<O: Oracle + ?Sized>(
    percent_time: f64,
    oracle: &mut O,
) -> Result<f64> {
    percent_curve(QueryKind::PiecewiseLinearPercentRate, percent_time, oracle)
}

pub fn linear_percent_rate<O: Oracle + ?Sized>(percent_time: f64, oracle: &mut O) -> Result<f64> {
    percent_curve(QueryKind::LinearPercentRate, percent_time, oracle)
}

fn percent_curve<O: Oracle + ?Sized>(
    kind: QueryKind,
    percent_time: f64,
    oracle: &mut O,
) -> Result<f64> {
    if !percent_time.is_finite() {
        return Err(Error::invalid_parameter("percent_time", "must be finite"));
    }
    oracle
        .call(&OracleRequest::PercentTime(percent_time), kind)?
        .into_scalar(kind)
}
