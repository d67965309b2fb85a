//! Configuration for the sensing agent host.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "adaptive-sensing-agent";

/// Main configuration for the agent host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path for diagnostics and other state
    pub data_path: PathBuf,

    /// Path for exported transition records
    pub export_path: PathBuf,

    /// Policy file to load instead of the built-in default
    pub policy_path: Option<PathBuf>,

    /// Execution budget for each scheduled callback, in seconds
    pub invocation_budget_secs: Option<u64>,

    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,

    /// Whether the protocol is paused (agents relinquish control while paused)
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            export_path: data_dir.join("exports"),
            data_path: data_dir,
            policy_path: None,
            invocation_budget_secs: Some(30),
            log_filter: "info".to_string(),
            paused: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Where diagnostics are persisted.
    pub fn diagnostics_path(&self) -> PathBuf {
        self.data_path.join("diagnostics.json")
    }

    pub fn invocation_budget(&self) -> Option<Duration> {
        self.invocation_budget_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.invocation_budget(), Some(Duration::from_secs(30)));
        assert!(config.policy_path.is_none());
        assert!(!config.paused);
        assert!(config.diagnostics_path().ends_with("diagnostics.json"));
    }

    #[test]
    fn test_zero_budget_means_unbounded() {
        let config = Config {
            invocation_budget_secs: Some(0),
            ..Config::default()
        };
        assert_eq!(config.invocation_budget(), None);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("sensing-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");

        let config = Config {
            paused: true,
            log_filter: "debug".to_string(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("sensing-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{ "paused": true }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.paused);
        assert_eq!(config.log_filter, "info");

        let _ = std::fs::remove_file(&path);
    }
}
