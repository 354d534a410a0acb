//! Startup configuration
//!
//! Resolved once: built-in defaults, then an optional TOML file, then
//! environment overrides. The file is `$COINDROP_CONFIG` if set, otherwise
//! `<config dir>/coindrop/config.toml` when it exists.
//!
//! ```toml
//! [broker]
//! url = "mqtt://localhost:1883"
//! topic = "device/ESP32-D15644"
//!
//! [publish]
//! cooldown_secs = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::gate::DEFAULT_COOLDOWN_SECS;
use crate::mqtt::{BrokerEndpoint, MqttConfig};

const CONFIG_DIR: &str = "coindrop";
const CONFIG_FILE: &str = "config.toml";

pub const ENV_CONFIG_PATH: &str = "COINDROP_CONFIG";
pub const ENV_MQTT_URL: &str = "COINDROP_MQTT_URL";
pub const ENV_MQTT_TOPIC: &str = "COINDROP_MQTT_TOPIC";
pub const ENV_COOLDOWN_SECS: &str = "COINDROP_COOLDOWN_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    pub url: String,
    pub topic: String,
    pub client_id_prefix: String,
    pub reconnect_period_ms: u64,
    pub connect_timeout_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        let defaults = MqttConfig::default();
        Self {
            url: defaults.broker_url,
            topic: defaults.topic,
            client_id_prefix: defaults.client_id_prefix,
            reconnect_period_ms: defaults.reconnect_period.as_millis() as u64,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            keep_alive_secs: defaults.keep_alive.as_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PublishSection {
    pub cooldown_secs: u32,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSection,
    pub publish: PublishSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// `$COINDROP_CONFIG` if set, otherwise `<config dir>/coindrop/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        std::env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .or_else(default_config_path)
    }

    /// Loads `path` if it exists, then applies the process environment.
    ///
    /// Runs before logging is set up, so it does not log; the caller reports
    /// which file was used.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_contents = match path {
            Some(path) if path.exists() => Some(read_file(path)?),
            _ => None,
        };

        Self::from_sources(file_contents.as_deref(), |key| std::env::var(key).ok())
    }

    /// Builds a config from optional TOML text and an environment lookup
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(contents) => toml::from_str::<AppConfig>(contents)?,
            None => AppConfig::default(),
        };

        if let Some(url) = env(ENV_MQTT_URL) {
            config.broker.url = url;
        }
        if let Some(topic) = env(ENV_MQTT_TOPIC) {
            config.broker.topic = topic;
        }
        if let Some(value) = env(ENV_COOLDOWN_SECS) {
            config.publish.cooldown_secs =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: ENV_COOLDOWN_SECS,
                    value,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        BrokerEndpoint::parse(&self.broker.url)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic must not be empty".to_string()));
        }
        if self.publish.cooldown_secs == 0 {
            return Err(ConfigError::Invalid(
                "cooldown_secs must be at least 1".to_string(),
            ));
        }
        if self.broker.reconnect_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_period_ms must be at least 1".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::Invalid(
                "keep_alive_secs must be at least 5".to_string(),
            ));
        }
        Ok(())
    }

    pub fn mqtt(&self) -> MqttConfig {
        MqttConfig {
            broker_url: self.broker.url.clone(),
            topic: self.broker.topic.clone(),
            client_id_prefix: self.broker.client_id_prefix.clone(),
            reconnect_period: Duration::from_millis(self.broker.reconnect_period_ms),
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
