//! Application configuration
//!
//! Loaded once at startup from a TOML file and handed to the MQTT handler by value.
//!
//! ```toml
//! log_level = "info"
//!
//! [mqtt]
//! host = "192.168.1.50"
//! password = "12345678"
//! serial = "01S00C123456789"   # optional, auto-discovered when omitted
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::mqtt::MqttConfig;

const CONFIG_DIR: &str = "bambustatus";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default tracing level when `RUST_LOG` is not set
    pub log_level: String,
    pub mqtt: MqttConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Applies `BAMBU_HOST`, `BAMBU_PASSWORD` and `BAMBU_SERIAL` when set.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BAMBU_HOST") {
            debug!("Host overridden from environment");
            self.mqtt.host = host;
        }
        if let Some(password) = lookup("BAMBU_PASSWORD") {
            debug!("Password overridden from environment");
            self.mqtt.password = password;
        }
        if let Some(serial) = lookup("BAMBU_SERIAL") {
            debug!("Serial overridden from environment");
            self.mqtt.serial = Some(serial);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host is required".to_string()));
        }
        if mqtt.password.is_empty() {
            return Err(ConfigError::Invalid("mqtt.password is required".to_string()));
        }
        if mqtt.port == 0 {
            return Err(ConfigError::Invalid("mqtt.port must not be 0".to_string()));
        }
        if mqtt.keep_alive_secs != 0 && mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive_secs must be 0 or at least 5".to_string(),
            ));
        }
        if mqtt.max_reconnect_interval_secs < mqtt.reconnect_initial_secs {
            return Err(ConfigError::Invalid(
                "mqtt.max_reconnect_interval_secs is smaller than mqtt.reconnect_initial_secs"
                    .to_string(),
            ));
        }
        if mqtt.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// `<config dir>/bambustatus/config.toml`, or `./config.toml` without a config dir.
pub fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(mut path) => {
            path.push(CONFIG_DIR);
            path.push(CONFIG_FILE);
            path
        }
        None => {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(CONFIG_FILE)
        }
    }
}
