//! Typed oracle request payloads and the request builder.
//!
//! Every payload serializes to the camelCase JSON object the prediction
//! engine expects. Dates go over the wire as UTC with second precision.

use chrono::{DateTime, Duration, NaiveDateTime};
use lw_common::{
    Channel, Error, InsulinType, RawTherapySettings, RecommendationType, Result, SeriesView,
    TherapySettings,
};
use lw_config::{CadenceCheck, SAMPLE_INTERVAL_SECONDS};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::extract::{extract_optional, extract_required};
use crate::logging::event_names;

/// Wire format for timestamps.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Absorption time attached to every carb entry, in seconds.
pub const CARB_ABSORPTION_SECONDS: f64 = 10_800.0;

/// Hourly basal rates are converted to the amount delivered in one sample.
pub const SAMPLES_PER_HOUR: f64 = 3600.0 / SAMPLE_INTERVAL_SECONDS as f64;

/// How far the constant settings schedules reach beyond the data.
pub fn settings_margin() -> Duration {
    Duration::hours(24)
}

/// Duration of a single dose entry.
pub fn dose_duration() -> Duration {
    Duration::seconds(SAMPLE_INTERVAL_SECONDS)
}

/// Format a naive UTC timestamp for the wire.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(DATE_FORMAT).to_string()
}

/// Parse a timestamp returned by the engine into the naive UTC index type.
///
/// Accepts RFC 3339 with any offset, `YYYY-MM-DD HH:MM:SS +0000`, and
/// offset-less forms (taken as UTC).
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    Err(Error::MalformedResponse(format!("unparseable timestamp: {raw:?}")))
}

mod utc_seconds {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(super::DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CarbEntry {
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub date: NaiveDateTime,
    pub grams: f64,
    /// Seconds.
    pub absorption_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DoseType {
    Bolus,
    Basal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DoseEntry {
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub start_date: NaiveDateTime,
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub end_date: NaiveDateTime,
    #[serde(rename = "type")]
    pub dose_type: DoseType,
    /// Units delivered over the entry.
    pub volume: f64,
    pub insulin_type: InsulinType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GlucoseEntry {
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub date: NaiveDateTime,
    pub value: f64,
}

/// One constant-valued entry of a settings schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub start_date: NaiveDateTime,
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub end_date: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub start_date: NaiveDateTime,
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub end_date: NaiveDateTime,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Payload for prediction, active insulin/carbs, velocity and dose queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub carb_entries: Vec<CarbEntry>,
    pub doses: Vec<DoseEntry>,
    pub glucose_history: Vec<GlucoseEntry>,
    pub basal: Vec<ScheduleEntry>,
    pub carb_ratio: Vec<ScheduleEntry>,
    pub sensitivity: Vec<ScheduleEntry>,
    pub max_basal_rate: f64,
    pub max_bolus: f64,
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub prediction_start: NaiveDateTime,
    pub recommendation_insulin_type: InsulinType,
    pub recommendation_type: RecommendationType,
    pub suspend_threshold: f64,
    pub target: Vec<TargetEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_integral_retrospective_correction: Option<bool>,
    #[serde(
        default,
        rename = "includePositiveVelocityAndRC",
        skip_serializing_if = "Option::is_none"
    )]
    pub include_positive_velocity_and_rc: Option<bool>,
}

/// One insulin counteraction sample fed to the dynamic carbs model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IceEntry {
    /// mg/dL/s.
    pub velocity: f64,
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub start_at: NaiveDateTime,
    #[serde(with = "utc_seconds")]
    #[schemars(with = "String")]
    pub end_at: NaiveDateTime,
}

/// Payload for the dynamic carbs-on-board query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynamicCarbsRequest {
    #[serde(rename = "inputICE")]
    pub input_ice: Vec<IceEntry>,
    pub carb_entries: Vec<CarbEntry>,
    pub sensitivity: f64,
    pub carb_ratio: f64,
}

/// Payload for the insulin percent-effect query. Durations are in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InsulinEffectRequest {
    pub minutes: f64,
    pub action_duration: f64,
    pub peak_activity_time: f64,
    pub delay: f64,
}

impl InsulinEffectRequest {
    /// Request for `minutes` after delivery using the model of `insulin_type`.
    pub fn for_insulin(insulin_type: InsulinType, minutes: f64) -> Self {
        Self {
            minutes,
            action_duration: insulin_type.action_duration().num_minutes() as f64,
            peak_activity_time: insulin_type.peak_activity().num_minutes() as f64,
            delay: insulin_type.delay().num_minutes() as f64,
        }
    }
}

/// JSON schema of [`PredictionRequest`].
pub fn prediction_request_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(PredictionRequest);
    serde_json::to_value(&schema).unwrap_or(serde_json::Value::Null)
}

/// Builds [`PredictionRequest`]s for slices of a series.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    settings: TherapySettings,
    cadence_check: CadenceCheck,
    use_integral_retrospective_correction: Option<bool>,
    include_positive_velocity_and_rc: Option<bool>,
}

impl RequestBuilder {
    pub fn new(settings: TherapySettings) -> Self {
        Self {
            settings,
            cadence_check: CadenceCheck::default(),
            use_integral_retrospective_correction: None,
            include_positive_velocity_and_rc: None,
        }
    }

    /// Builder from untyped settings. Unknown enum values fail here, before
    /// any request exists.
    pub fn from_raw(raw: &RawTherapySettings) -> Result<Self> {
        Ok(Self::new(TherapySettings::from_raw(raw)?))
    }

    pub fn with_cadence_check(mut self, cadence_check: CadenceCheck) -> Self {
        self.cadence_check = cadence_check;
        self
    }

    pub fn with_integral_retrospective_correction(mut self, enabled: bool) -> Self {
        self.use_integral_retrospective_correction = Some(enabled);
        self
    }

    pub fn with_positive_velocity_and_rc(mut self, enabled: bool) -> Self {
        self.include_positive_velocity_and_rc = Some(enabled);
        self
    }

    pub fn settings(&self) -> &TherapySettings {
        &self.settings
    }

    /// Build the request for `view` anchored at `prediction_start`.
    pub fn build(
        &self,
        view: &SeriesView<'_>,
        prediction_start: NaiveDateTime,
    ) -> Result<PredictionRequest> {
        let mut index = view.index().to_vec();
        if index.is_empty() {
            return Err(Error::EmptyWindow);
        }
        index.sort();
        self.check_cadence(&index)?;

        let first = index[0];
        let last = index[index.len() - 1];
        let insulin_type = self.settings.insulin_type;

        let mut doses: Vec<DoseEntry> = sorted(extract_optional(view, Channel::Bolus).iter())
            .into_iter()
            .filter(|(_, volume)| *volume != 0.0)
            .map(|(ts, volume)| DoseEntry {
                start_date: ts,
                end_date: ts + dose_duration(),
                dose_type: DoseType::Bolus,
                volume,
                insulin_type,
            })
            .collect();

        doses.extend(
            sorted(extract_required(view, Channel::Basal)?.iter())
                .into_iter()
                .map(|(ts, rate)| DoseEntry {
                    start_date: ts,
                    end_date: ts + dose_duration(),
                    dose_type: DoseType::Basal,
                    volume: rate / SAMPLES_PER_HOUR,
                    insulin_type,
                }),
        );
        doses.sort_by_key(|dose| dose.start_date);

        let glucose_history = sorted(extract_required(view, Channel::Glucose)?.iter())
            .into_iter()
            .map(|(date, value)| GlucoseEntry { date, value })
            .collect();

        let carb_entries = carb_entries(view);

        let window_start = first - settings_margin();
        let window_end = last + settings_margin();
        let constant = |value: f64| {
            vec![ScheduleEntry {
                start_date: window_start,
                end_date: window_end,
                value,
            }]
        };

        Ok(PredictionRequest {
            carb_entries,
            doses,
            glucose_history,
            basal: constant(self.settings.basal_rate),
            carb_ratio: constant(self.settings.cr),
            sensitivity: constant(self.settings.isf),
            max_basal_rate: self.settings.max_basal,
            max_bolus: self.settings.max_bolus,
            prediction_start,
            recommendation_insulin_type: insulin_type,
            recommendation_type: self.settings.recommendation_type,
            suspend_threshold: self.settings.suspend_threshold,
            target: vec![TargetEntry {
                start_date: first,
                end_date: last,
                lower_bound: self.settings.target_range.lower,
                upper_bound: self.settings.target_range.upper,
            }],
            use_integral_retrospective_correction: self.use_integral_retrospective_correction,
            include_positive_velocity_and_rc: self.include_positive_velocity_and_rc,
        })
    }

    /// Build the dynamic carbs request from the `ice` and `carbs` channels.
    pub fn build_dynamic_carbs(&self, view: &SeriesView<'_>) -> Result<DynamicCarbsRequest> {
        if view.is_empty() {
            return Err(Error::EmptyWindow);
        }
        let input_ice = sorted(extract_required(view, Channel::Ice)?.iter())
            .into_iter()
            .map(|(ts, velocity)| IceEntry {
                velocity,
                start_at: ts,
                end_at: ts + dose_duration(),
            })
            .collect();

        Ok(DynamicCarbsRequest {
            input_ice,
            carb_entries: carb_entries(view),
            sensitivity: self.settings.isf,
            carb_ratio: self.settings.cr,
        })
    }

    fn check_cadence(&self, index: &[NaiveDateTime]) -> Result<()> {
        if self.cadence_check == CadenceCheck::Ignore {
            return Ok(());
        }

        let irregular = index.windows(2).find_map(|pair| {
            let gap = (pair[1] - pair[0]).num_seconds();
            (gap != SAMPLE_INTERVAL_SECONDS).then_some((pair[1], gap))
        });

        let Some((at, gap_seconds)) = irregular else {
            return Ok(());
        };

        match self.cadence_check {
            CadenceCheck::Strict => Err(Error::IrregularCadence {
                at,
                gap_seconds,
                expected_seconds: SAMPLE_INTERVAL_SECONDS,
            }),
            _ => {
                tracing::warn!(
                    target: event_names::REQUEST_IRREGULAR_CADENCE,
                    at = %at,
                    gap_seconds,
                    expected_seconds = SAMPLE_INTERVAL_SECONDS,
                    "window sampling deviates from the 5-minute cadence"
                );
                Ok(())
            }
        }
    }
}

/// Build a request with default options.
pub fn build_request(
    view: &SeriesView<'_>,
    settings: &TherapySettings,
    prediction_start: NaiveDateTime,
) -> Result<PredictionRequest> {
    RequestBuilder::new(settings.clone()).build(view, prediction_start)
}

fn carb_entries(view: &SeriesView<'_>) -> Vec<CarbEntry> {
    sorted(extract_optional(view, Channel::Carbs).iter())
        .into_iter()
        .map(|(date, grams)| CarbEntry {
            date,
            grams,
            absorption_time: CARB_ABSORPTION_SECONDS,
        })
        .collect()
}

fn sorted(records: impl Iterator<Item = (NaiveDateTime, f64)>) -> Vec<(NaiveDateTime, f64)> {
    let mut records: Vec<_> = records.collect();
    records.sort_by_key(|(ts, _)| *ts);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use lw_common::TimeSeries;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 28)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn series(len: usize) -> TimeSeries {
        let mut bolus = vec![None; len];
        if len > 0 {
            bolus[0] = Some(10.0);
        }
        TimeSeries::regular(t0(), Duration::minutes(5), len)
            .with_channel(Channel::Bolus, bolus)
            .unwrap()
            .with_values(Channel::Basal, std::iter::repeat(1.2).take(len))
            .unwrap()
            .with_values(Channel::Glucose, std::iter::repeat(100.0).take(len))
            .unwrap()
    }

    fn settings() -> TherapySettings {
        TherapySettings::new(1.0, 45.0, 12.0)
    }

    #[test]
    fn test_basal_rate_converted_to_sample_volume() {
        let series = series(3);
        let request = build_request(&series.view(), &settings(), t0()).unwrap();
        let basal: Vec<_> = request
            .doses
            .iter()
            .filter(|d| d.dose_type == DoseType::Basal)
            .collect();
        assert_eq!(basal.len(), 3);
        assert!((basal[0].volume - 0.1).abs() < 1e-12);
        assert_eq!(basal[0].end_date - basal[0].start_date, Duration::minutes(5));
    }

    #[test]
    fn test_settings_window_brackets_data() {
        for len in [1, 2, 500] {
            let series = series(len);
            let request = build_request(&series.view(), &settings(), t0()).unwrap();
            let first = series.index()[0];
            let last = series.index()[len - 1];
            for schedule in [&request.basal, &request.carb_ratio, &request.sensitivity] {
                assert_eq!(schedule.len(), 1);
                assert_eq!(schedule[0].start_date, first - Duration::hours(24));
                assert_eq!(schedule[0].end_date, last + Duration::hours(24));
            }
            assert_eq!(request.target[0].start_date, first);
            assert_eq!(request.target[0].end_date, last);
        }
    }

    #[test]
    fn test_zero_bolus_dropped_and_doses_sorted() {
        let mut series = series(3);
        series
            .insert_channel(Channel::Bolus, vec![Some(0.0), Some(2.0), None])
            .unwrap();
        let request = build_request(&series.view(), &settings(), t0()).unwrap();

        let boluses: Vec<_> = request
            .doses
            .iter()
            .filter(|d| d.dose_type == DoseType::Bolus)
            .collect();
        assert_eq!(boluses.len(), 1);
        assert_eq!(boluses[0].volume, 2.0);
        assert!(request
            .doses
            .windows(2)
            .all(|w| w[0].start_date <= w[1].start_date));
        // Bolus precedes the basal entry at the same start.
        assert_eq!(request.doses[1].dose_type, DoseType::Bolus);
        assert_eq!(series.value(Channel::Bolus, 0), Some(0.0));
    }

    #[test]
    fn test_carbs_get_fixed_absorption() {
        let mut series = series(3);
        series
            .insert_channel(Channel::Carbs, vec![None, Some(30.0), None])
            .unwrap();
        let request = build_request(&series.view(), &settings(), t0()).unwrap();
        assert_eq!(request.carb_entries.len(), 1);
        assert_eq!(request.carb_entries[0].absorption_time, 10_800.0);
    }

    #[test]
    fn test_missing_glucose_is_channel_absent() {
        let series = TimeSeries::regular(t0(), Duration::minutes(5), 2)
            .with_values(Channel::Basal, [1.0, 1.0])
            .unwrap();
        let err = build_request(&series.view(), &settings(), t0()).unwrap_err();
        assert!(matches!(err, Error::ChannelAbsent { ref channel } if channel == "glucose"));
    }

    #[test]
    fn test_empty_window() {
        let series = series(3);
        let view = series.slice(1..1).unwrap();
        assert!(matches!(
            build_request(&view, &settings(), t0()),
            Err(Error::EmptyWindow)
        ));
    }

    #[test]
    fn test_unknown_insulin_type_rejected_before_building() {
        let raw = RawTherapySettings {
            basal_rate: 1.0,
            isf: 45.0,
            cr: 12.0,
            insulin_type: Some("unknown".to_string()),
            ..Default::default()
        };
        let err = RequestBuilder::from_raw(&raw).unwrap_err();
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_strict_cadence_rejects_gaps() {
        let a = t0();
        let series = TimeSeries::new(vec![a, a + Duration::minutes(5), a + Duration::minutes(15)])
            .with_values(Channel::Basal, [1.0; 3])
            .unwrap()
            .with_values(Channel::Glucose, [100.0; 3])
            .unwrap();

        let strict = RequestBuilder::new(settings()).with_cadence_check(CadenceCheck::Strict);
        let err = strict.build(&series.view(), a).unwrap_err();
        assert!(matches!(err, Error::IrregularCadence { gap_seconds: 600, .. }));

        let lenient = RequestBuilder::new(settings()).with_cadence_check(CadenceCheck::Warn);
        assert!(lenient.build(&series.view(), a).is_ok());
    }

    #[test]
    fn test_wire_json_shape() {
        let series = series(2);
        let request = RequestBuilder::new(settings())
            .with_integral_retrospective_correction(true)
            .build(&series.view(), series.index()[1])
            .unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["predictionStart"], "2024-02-28T00:05:00Z");
        assert_eq!(json["doses"][0]["type"], "bolus");
        assert_eq!(json["doses"][0]["insulinType"], "novolog");
        assert_eq!(json["recommendationType"], "automaticBolus");
        assert_eq!(json["target"][0]["lowerBound"], 100.0);
        assert_eq!(json["useIntegralRetrospectiveCorrection"], true);
        assert!(json.get("includePositiveVelocityAndRC").is_none());

        let back: PredictionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = t0();
        assert_eq!(parse_timestamp("2024-02-28T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-02-28T01:00:00+01:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-02-28 00:00:00 +0000").unwrap(), expected);
        assert_eq!(parse_timestamp(" 2024-02-28T00:00:00 ").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_dynamic_carbs_request() {
        let series = series(2)
            .with_values(Channel::Ice, [0.01, -0.02])
            .unwrap();
        let request = RequestBuilder::new(settings())
            .build_dynamic_carbs(&series.view())
            .unwrap();
        assert_eq!(request.input_ice.len(), 2);
        assert_eq!(request.sensitivity, 45.0);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["inputICE"][0]["start_at"], "2024-02-28T00:00:00Z");
        assert_eq!(json["carbRatio"], 12.0);
    }

    #[test]
    fn test_insulin_effect_request() {
        let request = InsulinEffectRequest::for_insulin(InsulinType::Fiasp, 30.0);
        assert_eq!(request.action_duration, 360.0);
        assert_eq!(request.peak_activity_time, 55.0);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["peakActivityTime"], 55.0);
    }

    #[test]
    fn test_schema_lists_wire_fields() {
        let schema = prediction_request_schema();
        let properties = &schema["properties"];
        assert!(properties.get("predictionStart").is_some());
        assert!(properties.get("glucoseHistory").is_some());
    }
}
