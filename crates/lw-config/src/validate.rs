//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::scheduler::SchedulerConfig;
use crate::Config;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required section: {0}")]
    MissingSection(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error(transparent)]
    Settings(#[from] lw_common::Error),
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::MissingSection(_) => 64,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
            ValidationError::Settings(err) => err.code(),
        }
    }
}

/// Validate a whole config document.
pub fn validate_config(config: &Config) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    if let Some(raw) = &config.therapy {
        lw_common::TherapySettings::from_raw(raw)?;
    }

    validate_scheduler(&config.scheduler)
}

/// Validate scheduler parameters.
pub fn validate_scheduler(scheduler: &SchedulerConfig) -> ValidationResult<()> {
    if scheduler.lookback == 0 {
        return Err(ValidationError::InvalidValue {
            field: "scheduler.lookback".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if scheduler.batch_size == 0 {
        return Err(ValidationError::InvalidValue {
            field: "scheduler.batch_size".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    if scheduler.overlap >= scheduler.batch_size {
        return Err(ValidationError::InvalidValue {
            field: "scheduler.overlap".to_string(),
            message: format!(
                "must be smaller than batch_size ({} >= {})",
                scheduler.overlap, scheduler.batch_size
            ),
        });
    }

    Ok(())
}
