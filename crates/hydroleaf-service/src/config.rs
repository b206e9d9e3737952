//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hydroleaf_core::{DEFAULT_GROUP, TelemetryOptions};
use hydroleaf_types::BucketWidth;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Ingestion and flush settings.
    pub ingest: IngestConfig,
    /// History query settings.
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// ```
    /// use hydroleaf_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.ingest.validate());
        errors.extend(self.history.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Engine options derived from the `ingest` and `history` sections.
    pub fn telemetry_options(&self) -> TelemetryOptions {
        TelemetryOptions {
            default_group: self.ingest.default_group.clone(),
            max_range: time::Duration::days(i64::from(self.history.max_range_days)),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new("server.bind", "bind address cannot be empty"));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: hydroleaf_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Minimum flush interval in seconds.
pub const MIN_FLUSH_INTERVAL: u64 = 1;
/// Maximum flush interval in seconds (1 hour).
pub const MAX_FLUSH_INTERVAL: u64 = 3600;

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Seconds between accumulator flushes.
    pub flush_interval_secs: u64,
    /// Group that auto-registered devices join.
    pub default_group: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
            default_group: DEFAULT_GROUP.to_string(),
        }
    }
}

impl IngestConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Validate ingestion configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.flush_interval_secs < MIN_FLUSH_INTERVAL {
            errors.push(ValidationError::new(
                "ingest.flush_interval_secs",
                format!(
                    "flush interval {} is too short (minimum {} second)",
                    self.flush_interval_secs, MIN_FLUSH_INTERVAL
                ),
            ));
        } else if self.flush_interval_secs > MAX_FLUSH_INTERVAL {
            errors.push(ValidationError::new(
                "ingest.flush_interval_secs",
                format!(
                    "flush interval {} is too long (maximum {} seconds / 1 hour)",
                    self.flush_interval_secs, MAX_FLUSH_INTERVAL
                ),
            ));
        }

        if self.default_group.trim().is_empty() {
            errors.push(ValidationError::new(
                "ingest.default_group",
                "default group cannot be empty",
            ));
        }

        errors
    }
}

/// Maximum configurable query span in days.
pub const MAX_RANGE_DAYS_LIMIT: u32 = 366;

/// History query configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Bucket width used when a request does not give one (e.g. "5m").
    pub default_bucket: String,
    /// Widest accepted query span, in days.
    pub max_range_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_bucket: "5m".to_string(),
            max_range_days: 31,
        }
    }
}

impl HistoryConfig {
    /// The default bucket width, falling back to 5 minutes if unparseable.
    pub fn default_bucket(&self) -> BucketWidth {
        self.default_bucket.parse().unwrap_or_default()
    }

    /// Validate history configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = self.default_bucket.parse::<BucketWidth>() {
            errors.push(ValidationError::new("history.default_bucket", e.to_string()));
        }

        if self.max_range_days == 0 || self.max_range_days > MAX_RANGE_DAYS_LIMIT {
            errors.push(ValidationError::new(
                "history.max_range_days",
                format!(
                    "max range {} must be between 1 and {} days",
                    self.max_range_days, MAX_RANGE_DAYS_LIMIT
                ),
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `ingest.flush_interval_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hydroleaf")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.storage.path, hydroleaf_store::default_db_path());
        assert_eq!(config.ingest.flush_interval_secs, 60);
        assert_eq!(config.ingest.default_group, "default");
        assert_eq!(config.history.default_bucket, "5m");
        assert_eq!(config.history.max_range_days, 31);
    }

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:9000"

            [storage]
            path = "/data/hydroleaf.db"

            [ingest]
            flush_interval_secs = 30
            default_group = "greenhouse"

            [history]
            default_bucket = "1h"
            max_range_days = 90
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.storage.path, PathBuf::from("/data/hydroleaf.db"));
        assert_eq!(config.ingest.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.history.default_bucket().seconds(), 3600);

        let options = config.telemetry_options();
        assert_eq!(options.default_group, "greenhouse");
        assert_eq!(options.max_range, time::Duration::days(90));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[ingest]\nflush_interval_secs = 5\n").unwrap();
        assert_eq!(config.ingest.flush_interval_secs, 5);
        assert_eq!(config.ingest.default_group, "default");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("server.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.storage.path = PathBuf::from("/tmp/test.db");
        config.ingest.flush_interval_secs = 15;

        config.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/test.db"));
        assert_eq!(loaded.ingest.flush_interval_secs, 15);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_validated_rejects_bad_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        std::fs::write(
            &config_path,
            "[ingest]\nflush_interval_secs = 0\n[history]\ndefault_bucket = \"0m\"\n",
        )
        .unwrap();

        match Config::load_validated(&config_path) {
            Err(ConfigError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["ingest.flush_interval_secs", "history.default_bucket"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_server_bind_validation() {
        let valid = |bind: &str| ServerConfig { bind: bind.to_string() }.validate();

        assert!(valid("127.0.0.1:8080").is_empty());
        assert!(valid("[::1]:8080").is_empty());
        assert!(valid("localhost:8080").is_empty());

        let errors = valid("");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("cannot be empty"));

        assert!(valid("127.0.0.1").iter().any(|e| e.message.contains("host:port")));
        assert!(valid("127.0.0.1:0").iter().any(|e| e.message.contains("port cannot be 0")));
        assert!(valid("127.0.0.1:http").iter().any(|e| e.message.contains("invalid port")));
    }

    #[test]
    fn test_ingest_validation() {
        let config = IngestConfig {
            flush_interval_secs: 7200,
            default_group: "  ".to_string(),
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("too long"));
        assert_eq!(errors[1].field, "ingest.default_group");
    }

    #[test]
    fn test_history_validation() {
        let config = HistoryConfig {
            default_bucket: "5x".to_string(),
            max_range_days: 0,
        };
        assert_eq!(config.validate().len(), 2);
        assert_eq!(config.default_bucket(), BucketWidth::default());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ConfigError::Validation(vec![ValidationError::new("server.bind", "bad")]);
        let display = err.to_string();
        assert!(display.contains("Configuration validation failed"));
        assert!(display.contains("  - server.bind: bad"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("hydroleaf/server.toml"));
    }
}
