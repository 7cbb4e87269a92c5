//! Downstream (outbound) session configuration

use std::time::Duration;

use serde::Deserialize;

/// Default downstream endpoint when none is configured
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

/// Downstream messaging backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundBackend {
    /// NATS server (subject + payload)
    #[default]
    Nats,
    /// Kafka cluster (topic + payload), requires the `kafka` feature
    Kafka,
}

impl std::fmt::Display for OutboundBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundBackend::Nats => write!(f, "nats"),
            OutboundBackend::Kafka => write!(f, "kafka"),
        }
    }
}

/// Configuration for the downstream publishing session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Which backend to publish to
    pub backend: OutboundBackend,

    /// Endpoint: NATS server URL(s), or Kafka bootstrap servers
    pub url: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Path to CA certificate file (PEM format); enables TLS
    pub ca_cert_file: Option<String>,

    /// When set, a fixed test message is published here right after
    /// connecting and a failure aborts startup
    pub probe_topic: Option<String>,

    /// Time allowed to establish the connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Time allowed for a single publish to be acknowledged (Kafka) and for
    /// the final flush on close
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            backend: OutboundBackend::default(),
            url: DEFAULT_NATS_URL.to_string(),
            username: None,
            password: None,
            ca_cert_file: None,
            probe_topic: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl OutboundConfig {
    /// Credentials, only when both username and password are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }

    /// CA file, if TLS is configured
    pub fn ca_file(&self) -> Option<&str> {
        self.ca_cert_file.as_deref().filter(|s| !s.is_empty())
    }

    /// Probe topic, if the construction-time smoke test is enabled
    pub fn probe_topic(&self) -> Option<&str> {
        self.probe_topic.as_deref().filter(|s| !s.is_empty())
    }
}
