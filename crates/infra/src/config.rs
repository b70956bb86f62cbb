//! Process configuration for the forecasting worker.
//!
//! Resolution order (highest priority first):
//! 1. Environment variables (`SIPREMS_*`)
//! 2. TOML file
//! 3. Compiled defaults
//!
//! The merged result is validated before use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use siprems_ai::ForecastConfig;
use siprems_core::TargetId;
use siprems_observability::LogFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid value for {field}: {message}")]
    Validation { field: String, message: String },
}

fn validation(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub forecast: ForecastConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the per-target artifact directories.
    pub artifact_dir: PathBuf,
    /// JSON-lines drift log.
    pub drift_log_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("models"),
            drift_log_path: PathBuf::from("models/drift.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    /// Targets kept fresh and checked for drift.
    pub targets: Vec<String>,
    /// Offset of the store's local calendar day from UTC.
    pub utc_offset_hours: i32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            max_retries: 5,
            base_backoff_ms: 250,
            targets: Vec::new(),
            utc_offset_hours: 0,
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Parsed target ids; call after `AppConfig::validate`.
    pub fn target_ids(&self) -> Result<Vec<TargetId>, ConfigError> {
        self.targets
            .iter()
            .map(|t| TargetId::new(t.as_str()).map_err(|e| validation("maintenance.targets", e.to_string())))
            .collect()
    }
}

impl AppConfig {
    /// Load `path` (if given), apply process environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a TOML string (no overrides, no validation).
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse {
            path: "<string>".to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `SIPREMS_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SIPREMS_ARTIFACT_DIR") {
            self.storage.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SIPREMS_DRIFT_LOG_PATH") {
            self.storage.drift_log_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SIPREMS_DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = lookup("SIPREMS_LOG_FILTER") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("SIPREMS_LOG_FORMAT") {
            self.logging.format = v
                .parse()
                .map_err(|e: String| validation("SIPREMS_LOG_FORMAT", e))?;
        }
        if let Some(v) = lookup("SIPREMS_TARGETS") {
            self.maintenance.targets = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("SIPREMS_INTERVAL_SECS") {
            self.maintenance.interval_secs = parse("SIPREMS_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("SIPREMS_UTC_OFFSET_HOURS") {
            self.maintenance.utc_offset_hours = parse("SIPREMS_UTC_OFFSET_HOURS", &v)?;
        }
        if let Some(v) = lookup("SIPREMS_MAX_MODEL_AGE_DAYS") {
            self.forecast.training.max_model_age_days = parse("SIPREMS_MAX_MODEL_AGE_DAYS", &v)?;
        }
        if let Some(v) = lookup("SIPREMS_MIN_HISTORY_DAYS") {
            self.forecast.training.min_history_days = parse("SIPREMS_MIN_HISTORY_DAYS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.forecast
            .validate()
            .map_err(|e| validation("forecast", e.to_string()))?;

        if self.storage.artifact_dir.as_os_str().is_empty() {
            return Err(validation("storage.artifact_dir", "must not be empty"));
        }
        if self.storage.drift_log_path.as_os_str().is_empty() {
            return Err(validation("storage.drift_log_path", "must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(validation("database.max_connections", "must be greater than 0"));
        }

        let m = &self.maintenance;
        if m.interval_secs == 0 {
            return Err(validation("maintenance.interval_secs", "must be greater than 0"));
        }
        if !(-12..=14).contains(&m.utc_offset_hours) {
            return Err(validation("maintenance.utc_offset_hours", "must be between -12 and 14"));
        }
        m.target_ids()?;
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| validation(field, format!("{raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.forecast.training.max_model_age_days, 7);
        assert_eq!(cfg.maintenance.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [storage]
            artifact_dir = "/var/lib/siprems/models"

            [forecast.recommendation]
            top_n = 8

            [maintenance]
            targets = ["main_store"]
            utc_offset_hours = 7
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.storage.artifact_dir, PathBuf::from("/var/lib/siprems/models"));
        assert_eq!(cfg.storage.drift_log_path, PathBuf::from("models/drift.jsonl"));
        assert_eq!(cfg.forecast.recommendation.top_n, 8);
        assert_eq!(cfg.forecast.recommendation.growth_max, 1.9);
        assert_eq!(cfg.maintenance.target_ids().unwrap()[0].as_str(), "main_store");
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            AppConfig::from_toml("[storage\nartifact_dir = 1"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = AppConfig::default();
        cfg.apply_env_overrides(env(&[
            ("SIPREMS_ARTIFACT_DIR", "/tmp/models"),
            ("SIPREMS_TARGETS", "a, b,,c"),
            ("SIPREMS_LOG_FORMAT", "compact"),
            ("SIPREMS_MAX_MODEL_AGE_DAYS", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.storage.artifact_dir, PathBuf::from("/tmp/models"));
        assert_eq!(cfg.maintenance.targets, vec!["a", "b", "c"]);
        assert_eq!(cfg.logging.format, LogFormat::Compact);
        assert_eq!(cfg.forecast.training.max_model_age_days, 3);
    }

    #[test]
    fn unparsable_env_value_is_rejected() {
        let mut cfg = AppConfig::default();
        let err = cfg
            .apply_env_overrides(env(&[("SIPREMS_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "SIPREMS_INTERVAL_SECS"));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.maintenance.targets = vec!["../escape".into()];
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation { .. })));

        let mut cfg = AppConfig::default();
        cfg.maintenance.interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.forecast.recommendation.growth_min = 5.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation { ref field, .. }) if field == "forecast"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppConfig::from_file(&dir.path().join("absent.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
