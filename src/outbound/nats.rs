//! NATS publisher

use std::path::PathBuf;
use std::time::Duration;

use async_nats::ConnectOptions;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::Publisher;
use crate::config::OutboundConfig;
use crate::error::SessionError;
use crate::tls;

/// Publishes to NATS subjects over a single client connection
pub struct NatsPublisher {
    url: String,
    /// Bound on the final flush
    request_timeout: Duration,
    /// Taken on close; `None` afterwards
    client: Mutex<Option<async_nats::Client>>,
}

impl NatsPublisher {
    /// Connect to the NATS server(s) at `config.url`
    pub async fn connect(config: &OutboundConfig) -> Result<Self, SessionError> {
        let mut options = ConnectOptions::new()
            .name("mqtt-relay")
            .connection_timeout(config.connect_timeout);

        if let Some((username, password)) = config.credentials() {
            options = options.user_and_password(username.to_string(), password.to_string());
        }

        if let Some(ca_file) = config.ca_file() {
            // Fail with a TLS error up front instead of a handshake error later
            tls::read_ca_file(ca_file)?;
            options = options
                .add_root_certificates(PathBuf::from(ca_file))
                .require_tls(true);
        }

        debug!("Connecting to NATS server {}", config.url);

        let client = timeout(config.connect_timeout, options.connect(config.url.as_str()))
            .await
            .map_err(|_| {
                SessionError::Connection(format!("timed out connecting to {}", config.url))
            })?
            .map_err(|e| SessionError::Connection(format!("{}: {}", config.url, e)))?;

        // A round trip to the server, so a half-open connection fails here
        timeout(config.connect_timeout, client.flush())
            .await
            .map_err(|_| {
                SessionError::Connection(format!(
                    "no response from {} within {:?}",
                    config.url, config.connect_timeout
                ))
            })?
            .map_err(|e| SessionError::Connection(format!("{}: {}", config.url, e)))?;

        info!("Connected to NATS server {}", config.url);

        Ok(Self {
            url: config.url.clone(),
            request_timeout: config.request_timeout,
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> Option<async_nats::Client> {
        self.client.lock().clone()
    }
}

#[async_trait]
impl Publisher for NatsPublisher {
    fn name(&self) -> &str {
        "nats"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SessionError> {
        let client = self
            .client()
            .ok_or_else(|| SessionError::Publish("connection is closed".to_string()))?;

        client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| {
                error!("Error publishing to NATS topic {}: {}", topic, e);
                SessionError::Publish(format!("{}: {}", topic, e))
            })
    }

    async fn close(&self) -> Result<(), SessionError> {
        let client = self
            .client
            .lock()
            .take()
            .ok_or_else(|| SessionError::Close("connection already closed".to_string()))?;

        // Bounded: the client retries a vanished server forever
        let flushed = timeout(self.request_timeout, client.flush()).await;
        drop(client);

        flushed
            .map_err(|_| {
                error!(
                    "NATS flush to {} did not complete within {:?}",
                    self.url, self.request_timeout
                );
                SessionError::Close(format!(
                    "{}: flush timed out after {:?}",
                    self.url, self.request_timeout
                ))
            })?
            .map_err(|e| SessionError::Close(format!("{}: {}", self.url, e)))?;

        info!("NATS connection to {} closed", self.url);
        Ok(())
    }
}
