//! Configuration snapshots for reproducibility.
//!
//! A snapshot records which config file fed a run and its content hash, so
//! results computed with different settings can be told apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolve::ConfigSource;
use crate::scheduler::SchedulerConfig;

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// Schema version of the configuration.
    pub schema_version: String,

    /// Path the config was loaded from.
    #[serde(default)]
    pub path: Option<String>,

    /// Source of the configuration.
    pub source: String,

    /// SHA-256 of the config file content.
    #[serde(default)]
    pub content_hash: Option<String>,

    /// Effective scheduler parameters.
    pub scheduler: SchedulerConfig,
}

impl ConfigSnapshot {
    pub fn new(
        schema_version: impl Into<String>,
        path: Option<String>,
        source: ConfigSource,
        content_hash: Option<String>,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            schema_version: schema_version.into(),
            path,
            source: source.to_string(),
            content_hash,
            scheduler,
        }
    }
}

/// Hex SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash("lookback = 72");
        let b = content_hash("lookback = 72");
        let c = content_hash("lookback = 36");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = ConfigSnapshot::new(
            "1.0.0",
            None,
            ConfigSource::BuiltinDefault,
            None,
            SchedulerConfig::default(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["source"], "builtin default");
        assert_eq!(json["scheduler"]["lookback"], 72);
    }
}
