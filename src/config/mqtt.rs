//! MQTT Configuration
//!
//! Configuration structures for the upstream MQTT session and the topic
//! mappings it subscribes to.

use std::time::Duration;

use serde::Deserialize;

/// Upstream broker connection scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerScheme {
    /// Plain MQTT over TCP (`mqtt://`, `tcp://`)
    #[default]
    Mqtt,
    /// MQTT over TLS (`mqtts://`, `ssl://`, `tls://`)
    Mqtts,
}

impl BrokerScheme {
    /// Map a URL scheme to a broker scheme
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Some(BrokerScheme::Mqtt),
            "mqtts" | "ssl" | "tls" => Some(BrokerScheme::Mqtts),
            _ => None,
        }
    }

    /// Get default port for this scheme
    pub fn default_port(&self) -> u16 {
        match self {
            BrokerScheme::Mqtt => 1883,
            BrokerScheme::Mqtts => 8883,
        }
    }

    /// Check if this scheme uses TLS
    pub fn uses_tls(&self) -> bool {
        matches!(self, BrokerScheme::Mqtts)
    }
}

/// Parsed upstream broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
}

/// Maps one MQTT topic to one downstream topic
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicMapping {
    /// Topic subscribed to on the MQTT broker
    #[serde(alias = "inbound")]
    pub mqtt_topic: String,

    /// Topic (NATS subject or Kafka topic) the payload is republished to
    #[serde(alias = "outbound")]
    pub queue_topic: String,
}

impl TopicMapping {
    pub fn new(mqtt_topic: impl Into<String>, queue_topic: impl Into<String>) -> Self {
        Self {
            mqtt_topic: mqtt_topic.into(),
            queue_topic: queue_topic.into(),
        }
    }
}

/// Configuration for the upstream MQTT session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address (`mqtt://host:port`, `ssl://host:port` or `host[:port]`)
    pub broker: String,

    /// Client id prefix; a random suffix is appended per process
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Path to CA certificate file (PEM format)
    pub ca_cert_file: Option<String>,

    /// Path to client certificate file (PEM format)
    pub client_cert_file: Option<String>,

    /// Path to client private key file (PEM format)
    pub client_key_file: Option<String>,

    /// Keep-alive interval (e.g. "30s")
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Time allowed for the CONNACK and each SUBACK
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Time allowed for in-flight acknowledgements on disconnect
    #[serde(with = "humantime_serde")]
    pub disconnect_grace: Duration,

    /// Pause between event loop polls after a transport error
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,

    /// Maximum packet size in bytes, both directions
    pub max_packet_size: usize,

    /// Capacity of the client request channel
    pub channel_capacity: usize,

    /// Ordered topic mappings
    #[serde(alias = "topic")]
    pub topics: Vec<TopicMapping>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            client_id: String::new(),
            username: None,
            password: None,
            ca_cert_file: None,
            client_cert_file: None,
            client_key_file: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            disconnect_grace: Duration::from_millis(250),
            reconnect_delay: Duration::from_secs(1),
            max_packet_size: 1024 * 1024,
            channel_capacity: 100,
            topics: Vec::new(),
        }
    }
}

impl MqttConfig {
    /// Parse the broker address into scheme, host and port
    pub fn parse_broker(&self) -> Result<BrokerAddress, String> {
        let raw = self.broker.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (
                BrokerScheme::from_scheme(scheme)
                    .ok_or_else(|| format!("unsupported scheme '{}'", scheme))?,
                rest,
            ),
            None => (BrokerScheme::default(), raw),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(format!("no host in '{}'", raw));
        }

        let (host, port) = match authority.rsplit_once(':') {
            // Bracketed IPv6 without a port, e.g. "[::1]"
            Some((_, tail)) if tail.ends_with(']') => (authority, scheme.default_port()),
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port '{}'", port_str))?;
                (host, port)
            }
            None => (authority, scheme.default_port()),
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("no host in '{}'", raw));
        }

        Ok(BrokerAddress {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Credentials, only when both username and password are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }

    /// TLS file triple (ca, cert, key).
    ///
    /// The three files are mutually required: configuring any of them
    /// without the others is an error.
    pub fn tls_files(&self) -> Result<Option<(&str, &str, &str)>, String> {
        let ca = self.ca_cert_file.as_deref().filter(|s| !s.is_empty());
        let cert = self.client_cert_file.as_deref().filter(|s| !s.is_empty());
        let key = self.client_key_file.as_deref().filter(|s| !s.is_empty());

        match (ca, cert, key) {
            (Some(ca), Some(cert), Some(key)) => Ok(Some((ca, cert, key))),
            (None, None, None) => Ok(None),
            _ => Err(
                "mqtt.ca_cert_file, mqtt.client_cert_file and mqtt.client_key_file \
                 must be configured together"
                    .to_string(),
            ),
        }
    }

    /// Topics to subscribe to, in configured order
    pub fn subscription_filters(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|m| m.mqtt_topic.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_broker(broker: &str) -> MqttConfig {
        MqttConfig {
            broker: broker.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_broker_with_scheme_and_port() {
        let addr = with_broker("mqtt://broker.example.com:1884")
            .parse_broker()
            .unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Mqtt);
        assert_eq!(addr.host, "broker.example.com");
        assert_eq!(addr.port, 1884);
    }

    #[test]
    fn test_parse_broker_paho_style_schemes() {
        let addr = with_broker("tcp://localhost:1883").parse_broker().unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Mqtt);

        let addr = with_broker("ssl://secure.example.com").parse_broker().unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Mqtts);
        assert_eq!(addr.port, 8883); // Default for TLS
    }

    #[test]
    fn test_parse_broker_without_scheme() {
        let addr = with_broker("broker.example.com").parse_broker().unwrap();
        assert_eq!(addr.scheme, BrokerScheme::Mqtt);
        assert_eq!(addr.host, "broker.example.com");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn test_parse_broker_ipv6() {
        let addr = with_broker("mqtt://[::1]:1999").parse_broker().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 1999);

        let addr = with_broker("[::1]").parse_broker().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.port, 1883);
    }

    #[test]
    fn test_parse_broker_rejects_bad_input() {
        assert!(with_broker("amqp://broker:5672").parse_broker().is_err());
        assert!(with_broker("mqtt://broker:notaport").parse_broker().is_err());
        assert!(with_broker("mqtt://").parse_broker().is_err());
    }

    #[test]
    fn test_credentials_require_both_fields() {
        let mut config = MqttConfig {
            username: Some("relay".to_string()),
            ..Default::default()
        };
        assert!(config.credentials().is_none());

        config.password = Some(String::new());
        assert!(config.credentials().is_none());

        config.password = Some("secret".to_string());
        assert_eq!(config.credentials(), Some(("relay", "secret")));
    }

    #[test]
    fn test_tls_files_triple() {
        let mut config = MqttConfig::default();
        assert_eq!(config.tls_files(), Ok(None));

        config.ca_cert_file = Some("ca.pem".to_string());
        assert!(config.tls_files().is_err());

        config.client_cert_file = Some("client.pem".to_string());
        config.client_key_file = Some("client.key".to_string());
        assert_eq!(
            config.tls_files(),
            Ok(Some(("ca.pem", "client.pem", "client.key")))
        );
    }

    #[test]
    fn test_broker_scheme_defaults() {
        assert_eq!(BrokerScheme::Mqtt.default_port(), 1883);
        assert_eq!(BrokerScheme::Mqtts.default_port(), 8883);
        assert!(BrokerScheme::Mqtts.uses_tls());
        assert!(!BrokerScheme::Mqtt.uses_tls());
        assert_eq!(BrokerScheme::from_scheme("SSL"), Some(BrokerScheme::Mqtts));
        assert_eq!(BrokerScheme::from_scheme("ws"), None);
    }
}
