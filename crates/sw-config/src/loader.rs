//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "sendwave.toml",
    "./config/sendwave.toml",
    "/etc/sendwave/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration: defaults, then file (if found), then env overrides.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("SENDWAVE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("SENDWAVE_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("SENDWAVE_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }

        if let Ok(val) = env::var("SENDWAVE_STORE_DRIVER") {
            config.store.driver = val;
        }
        if let Ok(val) = env::var("SENDWAVE_STORE_URL") {
            config.store.url = val;
        }

        if let Ok(val) = env::var("SENDWAVE_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.engine.max_attempts = n;
            }
        }
        if let Ok(val) = env::var("SENDWAVE_WORKER_SLOTS") {
            if let Ok(n) = val.parse() {
                config.engine.worker_slots = n;
            }
        }
        if let Ok(val) = env::var("SENDWAVE_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.engine.poll_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("SENDWAVE_RATE_LIMIT_PER_MINUTE") {
            if let Ok(n) = val.parse() {
                config.engine.rate_limit_per_minute = Some(n);
            }
        }
        if let Ok(val) = env::var("SENDWAVE_PER_SEND_SECONDS") {
            if let Ok(n) = val.parse() {
                config.engine.per_send_seconds = n;
            }
        }

        if let Ok(val) = env::var("SENDWAVE_CUSTOMERS_PATH") {
            config.data.customers_path = Some(val);
        }
        if let Ok(val) = env::var("SENDWAVE_TEMPLATES_PATH") {
            config.data.templates_path = Some(val);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 7777\n[store]\ndriver = \"memory\"").unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.http.port, 7777);
        assert_eq!(config.store.driver, "memory");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::with_path("/nonexistent/sendwave.toml")
            .load()
            .unwrap();
        assert_eq!(config.http.port, AppConfig::default().http.port);
    }
}
