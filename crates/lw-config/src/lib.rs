//! Loop window configuration loading and validation.
//!
//! This crate provides:
//! - The typed config document (therapy, scheduler and logging sections)
//! - Config resolution (explicit → env → XDG → /etc → defaults)
//! - Semantic validation
//! - Insulin-activity presets for the schedulers
//! - Config snapshots for run provenance

pub mod preset;
pub mod resolve;
pub mod scheduler;
pub mod snapshot;
pub mod validate;

pub use preset::{activity_samples, preset_for};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use scheduler::{CadenceCheck, FailurePolicy, SchedulerConfig, SAMPLE_INTERVAL_SECONDS};
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, validate_scheduler, ValidationError, ValidationResult};

use lw_common::{RawTherapySettings, TherapySettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Logging section of the config file.
///
/// Values stay as strings here; the logging module parses them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// The config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: String,
    pub therapy: Option<RawTherapySettings>,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            therapy: None,
            scheduler: SchedulerConfig::default(),
            logging: LoggingSection::default(),
        }
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    JsonError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid TOML in config file {path}: {source}")]
    TomlError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Semantic validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("No therapy settings configured")]
    MissingTherapy,
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file path (highest priority).
    pub path: Option<PathBuf>,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
    /// SHA-256 of the file content (None if using defaults).
    pub content_hash: Option<String>,
}

impl ResolvedConfig {
    /// Typed therapy settings, if the config carries any.
    pub fn therapy(&self) -> Result<TherapySettings, ConfigError> {
        let raw = self.config.therapy.as_ref().ok_or(ConfigError::MissingTherapy)?;
        TherapySettings::from_raw(raw)
            .map_err(|e| ConfigError::Validation(ValidationError::Settings(e)))
    }

    pub fn scheduler(&self) -> &SchedulerConfig {
        &self.config.scheduler
    }

    /// Create a config snapshot for run provenance.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot::new(
            self.config.schema_version.clone(),
            self.path.as_ref().map(|p| p.display().to_string()),
            self.source,
            self.content_hash.clone(),
            self.config.scheduler.clone(),
        )
    }
}

/// Load configuration with the standard resolution order.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let paths = resolve_config(options.path.as_deref());

    let Some(path) = paths.config else {
        return Ok(ResolvedConfig {
            config: Config::default(),
            path: None,
            source: ConfigSource::BuiltinDefault,
            content_hash: None,
        });
    };

    let (config, hash) = load_config_from_file(&path)?;
    Ok(ResolvedConfig {
        config,
        path: Some(path),
        source: paths.source,
        content_hash: Some(hash),
    })
}

/// Load and validate a config file; the format follows the extension.
pub fn load_config_from_file(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let hash = snapshot::content_hash(&content);
    let config = parse_config(path, &content)?;
    validate_config(&config)?;

    Ok((config, hash))
}

fn parse_config(path: &Path, content: &str) -> Result<Config, ConfigError> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(content).map_err(|e| ConfigError::JsonError {
            path: path.to_path_buf(),
            source: e,
        })
    } else {
        toml::from_str(content).map_err(|e| ConfigError::TomlError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TOML: &str = r#"
schema_version = "1.0.0"

[therapy]
basal_rate = 1.0
isf = 45.0
cr = 12.0
insulin_type = "fiasp"
target_range = [90.0, 110.0]

[scheduler]
lookback = 36
failure_policy = "isolate"

[logging]
level = "debug"
"#;

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop-window.toml");
        std::fs::write(&path, SAMPLE_TOML).unwrap();

        let resolved = load_config(&ConfigOptions {
            path: Some(path.clone()),
        })
        .unwrap();

        assert_eq!(resolved.source, ConfigSource::Explicit);
        assert_eq!(resolved.scheduler().lookback, 36);
        assert_eq!(resolved.scheduler().batch_size, 300);
        assert_eq!(resolved.scheduler().failure_policy, FailurePolicy::Isolate);
        assert_eq!(resolved.config.logging.level.as_deref(), Some("debug"));

        let therapy = resolved.therapy().unwrap();
        assert_eq!(therapy.insulin_type, lw_common::InsulinType::Fiasp);
        assert_eq!(therapy.target_range.lower, 90.0);
        assert_eq!(therapy.max_bolus, 10.0);

        let snapshot = resolved.snapshot();
        assert_eq!(snapshot.content_hash.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"therapy": {"basal_rate": 0.8, "isf": 50, "cr": 10}}"#,
        )
        .unwrap();

        let (config, _hash) = load_config_from_file(&path).unwrap();
        assert_eq!(config.schema_version, CONFIG_SCHEMA_VERSION);
        assert_eq!(config.therapy.unwrap().basal_rate, 0.8);
    }

    #[test]
    fn test_invalid_overlap_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop-window.toml");
        std::fs::write(&path, "[scheduler]\nbatch_size = 10\noverlap = 10\n").unwrap();

        let err = load_config_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_malformed_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop-window.toml");
        std::fs::write(&path, "[scheduler\nlookback = ").unwrap();

        let err = load_config_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TomlError { .. }));
        assert!(err.to_string().contains("loop-window.toml"));
    }

    #[test]
    fn test_missing_therapy() {
        let resolved = ResolvedConfig {
            config: Config::default(),
            path: None,
            source: ConfigSource::BuiltinDefault,
            content_hash: None,
        };
        assert!(matches!(resolved.therapy(), Err(ConfigError::MissingTherapy)));
    }
}
