//! Configuration Module
//!
//! Provides TOML-based configuration for the relay with support for:
//! - Logging level
//! - Upstream MQTT session (broker, client id, credentials, TLS files)
//! - Ordered topic mappings (MQTT topic -> downstream topic)
//! - Downstream session (NATS or Kafka endpoint, credentials, CA file)
//! - Environment variable overrides (MQTT_RELAY__* prefix)

use std::collections::HashMap;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use mqtt::{BrokerAddress, BrokerScheme, MqttConfig, TopicMapping};
pub use outbound::{OutboundBackend, OutboundConfig};

mod mqtt;
mod outbound;

/// Default location of the configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static regex is valid");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error (layering or deserialization)
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Config(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Static mapping from inbound MQTT topic to downstream topic
pub type TopicMap = HashMap<String, String>;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Upstream MQTT session and topic mappings
    pub mqtt: MqttConfig,
    /// Downstream session
    #[serde(alias = "nats")]
    pub outbound: OutboundConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQTT_RELAY__` prefix with double underscores for nesting:
    ///    - `MQTT_RELAY__MQTT__BROKER=mqtt://broker:1883` overrides `mqtt.broker`
    ///    - `MQTT_RELAY__OUTBOUND__URL=nats://nats:4222` overrides `outbound.url`
    ///
    /// Unlike a broker, the relay has no usable defaults for its required
    /// fields, so a missing file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let substituted = substitute_env_vars(&content);

        // Outbound defaults come from serde so that the `[nats]` alias does
        // not collide with a defaulted `outbound` table.
        let cfg = config::Config::builder()
            .set_default("log.level", default_log_level())?
            .add_source(File::from_str(&substituted, FileFormat::Toml))
            // Double underscore separates nested keys, single underscore preserved in field names
            .add_source(
                Environment::with_prefix("MQTT_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.mqtt.broker.trim().is_empty() {
            missing.push("mqtt.broker");
        }
        if self.mqtt.client_id.trim().is_empty() {
            missing.push("mqtt.client_id");
        }
        if self.mqtt.topics.is_empty() {
            missing.push("mqtt.topics");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        self.mqtt
            .parse_broker()
            .map_err(|e| ConfigError::Validation(format!("mqtt.broker: {}", e)))?;

        for (index, mapping) in self.mqtt.topics.iter().enumerate() {
            if mapping.mqtt_topic.is_empty() || mapping.queue_topic.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "mqtt.topics[{}] must have both 'mqtt_topic' and 'queue_topic'",
                    index
                )));
            }
        }

        self.mqtt.tls_files().map_err(ConfigError::Validation)?;

        // rumqttc rejects sub-second keep alive values other than zero
        if !self.mqtt.keep_alive.is_zero() && self.mqtt.keep_alive.as_secs() == 0 {
            return Err(ConfigError::Validation(
                "mqtt.keep_alive must be zero or at least one second".to_string(),
            ));
        }

        if self.outbound.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "outbound.url must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the topic lookup map.
    ///
    /// Mappings are applied in configured order, so a later entry for the
    /// same MQTT topic replaces an earlier one.
    pub fn topic_map(&self) -> TopicMap {
        self.mqtt
            .topics
            .iter()
            .map(|mapping| (mapping.mqtt_topic.clone(), mapping.queue_topic.clone()))
            .collect()
    }
}
