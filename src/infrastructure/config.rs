//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Validation failures surfaced after extraction.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_tasks: {0}. Must be between 1 and 256")]
    InvalidMaxConcurrentTasks(usize),

    #[error("Invalid min_interval_seconds: {0}. The enforced floor is 60")]
    InvalidMinInterval(u64),

    #[error("Invalid tick_seconds: {0}. Must be at least 1")]
    InvalidTick(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid history_capacity: {0}. Must be at least 1")]
    InvalidHistoryCapacity(usize),
}

/// Loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .coterie/config.yaml (project config)
    /// 3. .coterie/local.yaml (local overrides, optional)
    /// 4. Environment variables (COTERIE_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".coterie/config.yaml"))
            .merge(Yaml::file(".coterie/local.yaml"))
            .merge(Env::prefixed("COTERIE_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from one explicit file, merged over defaults.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let tasks = config.executor.max_concurrent_tasks;
        if tasks == 0 || tasks > 256 {
            return Err(ConfigError::InvalidMaxConcurrentTasks(tasks));
        }

        if config.scheduler.min_interval_seconds < 60 {
            return Err(ConfigError::InvalidMinInterval(
                config.scheduler.min_interval_seconds,
            ));
        }
        if config.scheduler.tick_seconds == 0 {
            return Err(ConfigError::InvalidTick(config.scheduler.tick_seconds));
        }

        if config.event_bus.history_capacity == 0 {
            return Err(ConfigError::InvalidHistoryCapacity(
                config.event_bus.history_capacity,
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        ConfigLoader::validate(&Config::default()).unwrap();
    }

    #[test]
    fn test_file_overrides() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "executor:\n  max_concurrent_tasks: 4\nlogging:\n  level: debug"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.executor.max_concurrent_tasks, 4);
        assert_eq!(config.logging.level, "debug");
        // Untouched sections keep defaults.
        assert_eq!(config.scheduler.tick_seconds, 1);
    }

    #[test]
    fn test_validation_rejects_low_min_interval() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "scheduler:\n  min_interval_seconds: 10").unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "executor:\n  max_concurrent_taskz: 4").unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "logging:\n  level: verbose").unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }
}
