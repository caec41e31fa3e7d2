//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod batch;
mod storage;

pub use batch::BatchConfig;
pub use storage::StorageConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CMDLEDGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CMDLEDGER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CMDLEDGER_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command ledger storage.
    pub storage: StorageConfig,
    /// Batch execution limits.
    pub batch: BatchConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from a YAML document, without consulting the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Create config for testing, with the ledger at `path`.
    pub fn for_test(path: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig {
                path: path.into(),
                ..StorageConfig::default()
            },
            batch: BatchConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.storage.path, "./data/ledger.db");
        assert_eq!(config.storage.max_connections, 16);
        assert_eq!(config.storage.busy_timeout_ms, 5000);
        assert!(config.storage.wal);
        assert_eq!(config.batch.max_requests, 200);
    }

    #[test]
    fn test_from_yaml_overrides_only_given_fields() {
        let config = Config::from_yaml(
            r#"
storage:
  path: /tmp/ledger.db
  wal: false
batch:
  max_requests: 5
"#,
        )
        .unwrap();

        assert_eq!(config.storage.path, "/tmp/ledger.db");
        assert!(!config.storage.wal);
        assert_eq!(config.storage.max_connections, 16);
        assert_eq!(config.batch.max_requests, 5);
    }

    #[test]
    fn test_from_yaml_empty_document_is_default() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_yaml_rejects_wrong_types() {
        assert!(matches!(
            Config::from_yaml("batch:\n  max_requests: many\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.yaml");
        std::fs::write(&path, "storage:\n  max_connections: 4\n").unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.storage.max_connections, 4);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(Config::load(Some("/nonexistent/cmdledger.yaml")).is_err());
    }

    #[test]
    fn test_for_test_sets_path() {
        let config = Config::for_test("/tmp/x.db");
        assert_eq!(config.storage.path, "/tmp/x.db");
    }
}
