//! Kafka publisher

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, error, info};

use super::{Publisher, PROBE_KEY, PROBE_VALUE};
use crate::config::OutboundConfig;
use crate::error::SessionError;
use crate::tls;

/// librdkafka `security.protocol` for the configured credentials and CA file
fn security_protocol(sasl: bool, tls: bool) -> &'static str {
    match (sasl, tls) {
        (true, true) => "sasl_ssl",
        (true, false) => "sasl_plaintext",
        (false, true) => "ssl",
        (false, false) => "plaintext",
    }
}

/// Produces to Kafka topics; each publish waits for its delivery report
pub struct KafkaPublisher {
    brokers: String,
    producer: FutureProducer,
    request_timeout: Duration,
}

impl KafkaPublisher {
    /// Create the producer and check the cluster is reachable
    pub async fn connect(config: &OutboundConfig) -> Result<Self, SessionError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.url.as_str())
            .set("client.id", "mqtt-relay")
            .set(
                "message.timeout.ms",
                config.request_timeout.as_millis().to_string(),
            );

        let ca_file = config.ca_file();
        if let Some(ca_file) = ca_file {
            tls::read_ca_file(ca_file)?;
            client_config.set("ssl.ca.location", ca_file);
        }

        let credentials = config.credentials();
        if let Some((username, password)) = credentials {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        client_config.set(
            "security.protocol",
            security_protocol(credentials.is_some(), ca_file.is_some()),
        );

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| SessionError::Connection(format!("{}: {}", config.url, e)))?;

        // Producers connect lazily; fetching metadata forces a round trip
        debug!("Fetching Kafka metadata from {}", config.url);
        let metadata_producer = producer.clone();
        let connect_timeout = config.connect_timeout;
        tokio::task::spawn_blocking(move || {
            metadata_producer
                .client()
                .fetch_metadata(None, connect_timeout)
                .map(|_| ())
        })
        .await
        .map_err(|e| SessionError::Connection(e.to_string()))?
        .map_err(|e| SessionError::Connection(format!("{}: {}", config.url, e)))?;

        info!("Connected to Kafka brokers {}", config.url);

        Ok(Self {
            brokers: config.url.clone(),
            producer,
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SessionError> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_ref());

        self.producer
            .send(record, Timeout::After(self.request_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| {
                error!("Error publishing message to topic {}: {}", topic, e);
                SessionError::Publish(format!("{}: {}", topic, e))
            })
    }

    async fn close(&self) -> Result<(), SessionError> {
        let producer = self.producer.clone();
        let flush_timeout = self.request_timeout;

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(flush_timeout)))
            .await
            .map_err(|e| SessionError::Close(e.to_string()))?
            .map_err(|e| {
                error!("Error closing Kafka producer: {}", e);
                SessionError::Close(format!("{}: {}", self.brokers, e))
            })?;

        info!("Kafka producer for {} closed", self.brokers);
        Ok(())
    }

    async fn probe(&self, topic: &str) -> Result<(), SessionError> {
        let record = FutureRecord::to(topic).key(PROBE_KEY).payload(PROBE_VALUE);

        self.producer
            .send(record, Timeout::After(self.request_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| SessionError::Publish(format!("{}: {}", topic, e)))
    }
}
