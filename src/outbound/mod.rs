//! Outbound (downstream) sessions
//!
//! A [`Publisher`] owns the connection to the downstream broker and exposes
//! a single `publish(topic, payload)` capability. Two backends implement it:
//!
//! - [`NatsPublisher`]: publishes to NATS subjects
//! - `KafkaPublisher`: produces to Kafka topics (cargo feature `kafka`)
//!
//! The backend is selected by `outbound.backend`. Credentials and TLS are
//! options of each backend, not separate types.
//!
//! # Example Configuration
//!
//! ```toml
//! [outbound]
//! backend = "nats"
//! url = "nats://nats.internal:4222"
//! username = "relay"
//! password = "secret"
//! ca_cert_file = "/etc/relay/nats-ca.pem"
//! probe_topic = "relay.health"   # optional startup smoke test
//! ```

#[cfg(feature = "kafka")]
mod kafka;
mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use crate::config::{OutboundBackend, OutboundConfig};
use crate::error::SessionError;

#[cfg(feature = "kafka")]
pub use kafka::KafkaPublisher;
pub use nats::NatsPublisher;

/// Key of the startup smoke-test message (used where the backend has keys)
pub const PROBE_KEY: &[u8] = b"test-key";
/// Payload of the startup smoke-test message
pub const PROBE_VALUE: &[u8] = b"test-value";

/// Downstream publishing capability
///
/// Implementations must tolerate concurrent `publish` calls.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Name of the backend, for diagnostics
    fn name(&self) -> &str;

    /// Send `payload` verbatim to `topic`.
    ///
    /// No buffering and no retry: a failure is returned to the caller and
    /// the message is gone.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SessionError>;

    /// Flush and release the connection. Call once, at shutdown.
    async fn close(&self) -> Result<(), SessionError>;

    /// Publish the fixed smoke-test message to `topic`
    async fn probe(&self, topic: &str) -> Result<(), SessionError> {
        self.publish(topic, Bytes::from_static(PROBE_VALUE)).await
    }
}

/// Connect to the configured downstream backend.
///
/// When `outbound.probe_topic` is set, the smoke-test message is published
/// before returning and its failure is reported as a connection error.
pub async fn connect(config: &OutboundConfig) -> Result<Arc<dyn Publisher>, SessionError> {
    let publisher: Arc<dyn Publisher> = match config.backend {
        OutboundBackend::Nats => Arc::new(NatsPublisher::connect(config).await?),
        #[cfg(feature = "kafka")]
        OutboundBackend::Kafka => Arc::new(KafkaPublisher::connect(config).await?),
        #[cfg(not(feature = "kafka"))]
        OutboundBackend::Kafka => {
            return Err(SessionError::InvalidConfig(
                "the kafka backend requires building with the `kafka` feature".to_string(),
            ))
        }
    };

    match config.probe_topic() {
        Some(topic) => {
            publisher.probe(topic).await.map_err(|e| {
                SessionError::Connection(format!("smoke-test publish to {} failed: {}", topic, e))
            })?;
            info!(
                "{}: smoke-test message sent to {}",
                publisher.name(),
                topic
            );
        }
        None => debug!("{}: no probe_topic configured, skipping smoke test", publisher.name()),
    }

    Ok(publisher)
}
