//! SendWave configuration.
//!
//! TOML file with environment variable overrides (`SENDWAVE_*`). Every knob
//! has a default so the server starts with no config file at all.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub engine: EngineConfig,
    pub data: DataConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            store: StoreConfig::default(),
            engine: EngineConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_attempts must be at least 1".into(),
            ));
        }
        if self.engine.worker_slots == 0 {
            return Err(ConfigError::ValidationError(
                "engine.worker_slots must be at least 1".into(),
            ));
        }
        if !self.engine.per_send_seconds.is_finite() || self.engine.per_send_seconds < 0.0 {
            return Err(ConfigError::ValidationError(
                "engine.per_send_seconds must be a non-negative number".into(),
            ));
        }
        if self.store.driver != "sqlite" && self.store.driver != "memory" {
            return Err(ConfigError::ValidationError(format!(
                "unknown store.driver '{}' (expected 'sqlite' or 'memory')",
                self.store.driver
            )));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    pub driver: String,
    /// sqlx connection URL, used when driver = "sqlite"
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".to_string(),
            url: "sqlite://sendwave.db?mode=rwc".to_string(),
        }
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max send attempts per message before a transient failure becomes terminal.
    pub max_attempts: u32,
    /// How many batches may be drained concurrently.
    pub worker_slots: usize,
    /// How often the scheduler polls for claimable batches.
    pub poll_interval_ms: u64,
    /// Optional global ceiling across all batches, in messages per minute.
    pub rate_limit_per_minute: Option<u32>,
    /// Per-send latency assumption used by the estimator.
    pub per_send_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            worker_slots: 4,
            poll_interval_ms: 1000,
            rate_limit_per_minute: None,
            per_send_seconds: 0.5,
        }
    }
}

/// Seed data handed to the core by the (external) customer/template stores.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DataConfig {
    /// JSON file with an array of customers.
    pub customers_path: Option<String>,
    /// JSON file with an array of templates.
    pub templates_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut config = AppConfig::default();
        config.engine.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_per_send_seconds() {
        let mut config = AppConfig::default();
        config.engine.per_send_seconds = -1.0;
        assert!(config.validate().is_err());
        config.engine.per_send_seconds = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [http]
            port = 9000

            [engine]
            max_attempts = 5
            rate_limit_per_minute = 600

            [store]
            driver = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.rate_limit_per_minute, Some(600));
        assert_eq!(config.store.driver, "memory");
    }
}
