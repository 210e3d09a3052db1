//! Therapy settings and the enumerations the prediction engine accepts.

use crate::error::{Error, Result};
use chrono::Duration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Insulin formulations known to the prediction engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InsulinType {
    #[default]
    Novolog,
    Humalog,
    Apidra,
    Fiasp,
    Lyumjev,
    Afrezza,
}

impl InsulinType {
    pub const ALL: &'static [InsulinType] = &[
        InsulinType::Novolog,
        InsulinType::Humalog,
        InsulinType::Apidra,
        InsulinType::Fiasp,
        InsulinType::Lyumjev,
        InsulinType::Afrezza,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsulinType::Novolog => "novolog",
            InsulinType::Humalog => "humalog",
            InsulinType::Apidra => "apidra",
            InsulinType::Fiasp => "fiasp",
            InsulinType::Lyumjev => "lyumjev",
            InsulinType::Afrezza => "afrezza",
        }
    }

    /// Total duration of insulin activity.
    pub fn action_duration(&self) -> Duration {
        match self {
            InsulinType::Afrezza => Duration::minutes(300),
            _ => Duration::minutes(360),
        }
    }

    /// Time from delivery to peak activity.
    pub fn peak_activity(&self) -> Duration {
        match self {
            InsulinType::Novolog | InsulinType::Humalog | InsulinType::Apidra => {
                Duration::minutes(75)
            }
            InsulinType::Fiasp | InsulinType::Lyumjev => Duration::minutes(55),
            InsulinType::Afrezza => Duration::minutes(29),
        }
    }

    /// Delay before the insulin starts acting.
    pub fn delay(&self) -> Duration {
        Duration::minutes(10)
    }

    fn allowed() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for InsulinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InsulinType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        InsulinType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidEnum {
                field: "insulin_type",
                value: s.to_string(),
                allowed: InsulinType::allowed(),
            })
    }
}

/// Kind of dose recommendation requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RecommendationType {
    #[default]
    AutomaticBolus,
    TempBasal,
    ManualBolus,
}

impl RecommendationType {
    pub const ALL: &'static [RecommendationType] = &[
        RecommendationType::AutomaticBolus,
        RecommendationType::TempBasal,
        RecommendationType::ManualBolus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::AutomaticBolus => "automaticBolus",
            RecommendationType::TempBasal => "tempBasal",
            RecommendationType::ManualBolus => "manualBolus",
        }
    }
}

impl std::fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecommendationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RecommendationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidEnum {
                field: "recommendation_type",
                value: s.to_string(),
                allowed: RecommendationType::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Glucose target band (mg/dL).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TargetRange {
    pub lower: f64,
    pub upper: f64,
}

impl Default for TargetRange {
    fn default() -> Self {
        Self {
            lower: 100.0,
            upper: 115.0,
        }
    }
}

/// Static therapy settings shared by every request of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TherapySettings {
    /// Scheduled basal rate (U/hr).
    pub basal_rate: f64,
    /// Insulin sensitivity factor (mg/dL per U).
    pub isf: f64,
    /// Carbohydrate ratio (g per U).
    pub cr: f64,
    pub insulin_type: InsulinType,
    /// Maximum basal rate (U/hr).
    pub max_basal: f64,
    /// Maximum bolus (U).
    pub max_bolus: f64,
    pub recommendation_type: RecommendationType,
    /// Suspend threshold (mg/dL).
    pub suspend_threshold: f64,
    pub target_range: TargetRange,
}

impl TherapySettings {
    /// Settings with the given basal rate, ISF and CR and defaults elsewhere.
    pub fn new(basal_rate: f64, isf: f64, cr: f64) -> Self {
        Self {
            basal_rate,
            isf,
            cr,
            insulin_type: InsulinType::default(),
            max_basal: 4.0,
            max_bolus: 10.0,
            recommendation_type: RecommendationType::default(),
            suspend_threshold: 70.0,
            target_range: TargetRange::default(),
        }
    }

    pub fn with_insulin_type(mut self, insulin_type: InsulinType) -> Self {
        self.insulin_type = insulin_type;
        self
    }

    pub fn with_recommendation_type(mut self, recommendation_type: RecommendationType) -> Self {
        self.recommendation_type = recommendation_type;
        self
    }

    pub fn with_limits(mut self, max_basal: f64, max_bolus: f64) -> Self {
        self.max_basal = max_basal;
        self.max_bolus = max_bolus;
        self
    }

    pub fn with_target_range(mut self, lower: f64, upper: f64) -> Self {
        self.target_range = TargetRange { lower, upper };
        self
    }

    pub fn with_suspend_threshold(mut self, suspend_threshold: f64) -> Self {
        self.suspend_threshold = suspend_threshold;
        self
    }

    /// Validate enumerations from untyped input, then build typed settings.
    ///
    /// Both enum fields are checked before anything else is looked at.
    pub fn from_raw(raw: &RawTherapySettings) -> Result<Self> {
        let insulin_type = match &raw.insulin_type {
            Some(s) => s.parse::<InsulinType>()?,
            None => InsulinType::default(),
        };
        let recommendation_type = match &raw.recommendation_type {
            Some(s) => s.parse::<RecommendationType>()?,
            None => RecommendationType::default(),
        };

        let defaults = TherapySettings::new(raw.basal_rate, raw.isf, raw.cr);
        let settings = TherapySettings {
            insulin_type,
            recommendation_type,
            max_basal: raw.max_basal.unwrap_or(defaults.max_basal),
            max_bolus: raw.max_bolus.unwrap_or(defaults.max_bolus),
            suspend_threshold: raw.suspend_threshold.unwrap_or(defaults.suspend_threshold),
            target_range: raw
                .target_range
                .map(|[lower, upper]| TargetRange { lower, upper })
                .unwrap_or(defaults.target_range),
            ..defaults
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks on the numeric fields.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("basal_rate", self.basal_rate),
            ("isf", self.isf),
            ("cr", self.cr),
            ("max_basal", self.max_basal),
            ("max_bolus", self.max_bolus),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::invalid_parameter(
                    name,
                    format!("must be a positive number (got {value})"),
                ));
            }
        }
        if !self.suspend_threshold.is_finite() {
            return Err(Error::invalid_parameter(
                "suspend_threshold",
                "must be finite",
            ));
        }
        let TargetRange { lower, upper } = self.target_range;
        if !(lower.is_finite() && upper.is_finite()) || lower > upper {
            return Err(Error::invalid_parameter(
                "target_range",
                format!("lower ({lower}) must be <= upper ({upper})"),
            ));
        }
        Ok(())
    }
}

/// Untyped therapy settings as supplied by callers and config files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTherapySettings {
    pub basal_rate: f64,
    pub isf: f64,
    pub cr: f64,
    #[serde(default)]
    pub insulin_type: Option<String>,
    #[serde(default)]
    pub max_basal: Option<f64>,
    #[serde(default)]
    pub max_bolus: Option<f64>,
    #[serde(default)]
    pub recommendation_type: Option<String>,
    #[serde(default)]
    pub suspend_threshold: Option<f64>,
    #[serde(default)]
    pub target_range: Option<[f64; 2]>,
}
