//! Inbound (upstream) MQTT session
//!
//! Connects to the source broker, subscribes to every configured MQTT topic
//! and hands each received message to a [`MessageHandler`].
//!
//! The session is driven in three steps, each of which must succeed before
//! the next:
//!
//! 1. [`InboundSession::connect`] waits for the broker's CONNACK
//! 2. [`InboundSession::subscribe`] subscribes topic by topic, QoS 2
//! 3. [`InboundSession::start`] moves the event loop into a background task
//!
//! Once started, the task reconnects after transport errors and re-issues
//! the subscriptions when the broker did not keep the session.


use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubAck, SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BrokerAddress, MqttConfig};
use crate::error::SessionError;
use crate::tls::{self, TlsError};

/// A message received from the upstream broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Receives every message delivered on a subscribed topic
///
/// Messages are handed over one at a time, in arrival order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

/// Forward messages into a channel
#[async_trait]
impl MessageHandler for mpsc::Sender<InboundMessage> {
    async fn handle(&self, message: InboundMessage) {
        if self.send(message).await.is_err() {
            debug!("Inbound message receiver dropped");
        }
    }
}

/// Connection status of the inbound session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not connected
    Disconnected,
    /// Waiting for CONNACK
    Connecting,
    /// Connected and operational
    Connected,
    /// Connection lost, waiting before the next attempt
    Backoff,
}

/// Inbound MQTT session
pub struct InboundSession {
    config: MqttConfig,
    address: BrokerAddress,
    client_id: String,
    client: AsyncClient,
    /// Present until `start` hands it to the background task
    event_loop: Option<EventLoop>,
    handler: Arc<dyn MessageHandler>,
    status: Arc<RwLock<SessionStatus>>,
    task: Option<JoinHandle<()>>,
}

impl InboundSession {
    /// Build the client; no network traffic happens until [`connect`](Self::connect).
    ///
    /// The configured client id gets a random suffix so several relays can
    /// share one broker.
    pub fn new(config: &MqttConfig, handler: Arc<dyn MessageHandler>) -> Result<Self, SessionError> {
        let address = config.parse_broker().map_err(SessionError::InvalidConfig)?;
        let client_id = format!("{}-{}", config.client_id, Uuid::new_v4());

        let mut options = MqttOptions::new(client_id.clone(), address.host.clone(), address.port);
        options
            .set_keep_alive(config.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(config.max_packet_size, config.max_packet_size);

        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        match config.tls_files().map_err(SessionError::InvalidConfig)? {
            Some((ca, cert, key)) => {
                let material = tls::load_client_material(ca, cert, key)?;
                options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                    ca: material.ca,
                    alpn: None,
                    client_auth: Some(material.identity),
                }));
            }
            None if address.scheme.uses_tls() => {
                return Err(TlsError::ConfigError(format!(
                    "broker {} uses TLS but mqtt.ca_cert_file, mqtt.client_cert_file and mqtt.client_key_file are not set",
                    config.broker
                ))
                .into());
            }
            None => {}
        }

        let (client, event_loop) = AsyncClient::new(options, config.channel_capacity);

        Ok(Self {
            config: config.clone(),
            address,
            client_id,
            client,
            event_loop: Some(event_loop),
            handler,
            status: Arc::new(RwLock::new(SessionStatus::Disconnected)),
            task: None,
        })
    }

    /// Client id sent to the broker
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    fn event_loop(&mut self) -> Result<&mut EventLoop, SessionError> {
        self.event_loop
            .as_mut()
            .ok_or_else(|| SessionError::Connection("session already started".to_string()))
    }

    /// Open the connection and wait for the broker to accept it
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let connect_timeout = self.config.connect_timeout;
        let broker = format!("{}:{}", self.address.host, self.address.port);
        *self.status.write() = SessionStatus::Connecting;

        debug!("Connecting to MQTT broker {} as {}", broker, self.client_id);

        let result = timeout(connect_timeout, wait_for_connack(self.event_loop()?)).await;
        match result {
            Ok(Ok(())) => {
                *self.status.write() = SessionStatus::Connected;
                info!("Connected to MQTT broker {}", broker);
                Ok(())
            }
            Ok(Err(e)) => {
                *self.status.write() = SessionStatus::Disconnected;
                Err(SessionError::Connection(format!("{}: {}", broker, e)))
            }
            Err(_) => {
                *self.status.write() = SessionStatus::Disconnected;
                Err(SessionError::Connection(format!(
                    "{}: no CONNACK within {:?}",
                    broker, connect_timeout
                )))
            }
        }
    }

    /// Subscribe to every configured MQTT topic, in configuration order.
    ///
    /// Each subscription waits for its SUBACK before the next is sent. The
    /// first failure is returned and the remaining topics are skipped;
    /// subscriptions already granted stay in place.
    pub async fn subscribe(&mut self) -> Result<(), SessionError> {
        let filters: Vec<String> = self
            .config
            .subscription_filters()
            .map(str::to_string)
            .collect();
        let ack_timeout = self.config.connect_timeout;
        let handler = self.handler.clone();

        for topic in filters {
            self.client
                .subscribe(topic.as_str(), QoS::ExactlyOnce)
                .await
                .map_err(|e| SessionError::Subscription {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            let event_loop = self.event_loop()?;
            let reason = match timeout(ack_timeout, wait_for_suback(event_loop, handler.as_ref())).await
            {
                Ok(Ok(())) => None,
                Ok(Err(reason)) => Some(reason),
                Err(_) => Some(format!("no SUBACK within {:?}", ack_timeout)),
            };

            if let Some(reason) = reason {
                error!("Failed to subscribe to MQTT topic {}: {}", topic, reason);
                return Err(SessionError::Subscription { topic, reason });
            }

            info!("Subscribed to MQTT topic: {}", topic);
        }

        Ok(())
    }

    /// Hand the event loop to a background task that dispatches messages
    pub fn start(&mut self) -> Result<(), SessionError> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_else(|| SessionError::Connection("session already started".to_string()))?;

        let filters: Vec<String> = self
            .config
            .subscription_filters()
            .map(str::to_string)
            .collect();

        self.task = Some(tokio::spawn(run_event_loop(
            event_loop,
            self.client.clone(),
            self.handler.clone(),
            self.status.clone(),
            filters,
            self.config.reconnect_delay,
        )));

        debug!("Inbound MQTT session {} started", self.client_id);
        Ok(())
    }

    /// Send DISCONNECT and stop the session.
    ///
    /// Waits at most `mqtt.disconnect_grace` for the DISCONNECT to go out.
    pub async fn disconnect(mut self) {
        let grace = self.config.disconnect_grace;

        if let Err(e) = self.client.disconnect().await {
            debug!("Could not queue MQTT DISCONNECT: {}", e);
        }

        if let Some(mut task) = self.task.take() {
            if timeout(grace, &mut task).await.is_err() {
                warn!("MQTT session did not stop within {:?}, aborting", grace);
                task.abort();
            }
        } else if let Some(mut event_loop) = self.event_loop.take() {
            let _ = timeout(grace, async {
                loop {
                    match event_loop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
        }

        *self.status.write() = SessionStatus::Disconnected;
        info!("Disconnected from MQTT broker {}", self.config.broker);
    }
}

async fn dispatch(handler: &dyn MessageHandler, publish: Publish) {
    handler
        .handle(InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
        })
        .await;
}

/// Whether the broker refused any filter in the SUBSCRIBE this acknowledges
fn rejected(ack: &SubAck) -> bool {
    ack.return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            debug!("CONNACK received (session_present={})", ack.session_present);
            return Ok(());
        }
    }
}

/// Poll until the SUBACK for the next outgoing SUBSCRIBE arrives.
///
/// Messages delivered meanwhile are dispatched, not dropped.
async fn wait_for_suback(
    event_loop: &mut EventLoop,
    handler: &dyn MessageHandler,
) -> Result<(), String> {
    let mut pkid = None;

    loop {
        match event_loop.poll().await.map_err(|e| e.to_string())? {
            Event::Outgoing(Outgoing::Subscribe(id)) => pkid = Some(id),
            Event::Incoming(Packet::SubAck(ack)) if pkid.map_or(true, |id| id == ack.pkid) => {
                if rejected(&ack) {
                    return Err("broker rejected the subscription".to_string());
                }
                return Ok(());
            }
            Event::Incoming(Packet::Publish(publish)) => dispatch(handler, publish).await,
            _ => {}
        }
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    handler: Arc<dyn MessageHandler>,
    status: Arc<RwLock<SessionStatus>>,
    filters: Vec<String>,
    reconnect_delay: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch(handler.as_ref(), publish).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                *status.write() = SessionStatus::Connected;
                info!("Reconnected to MQTT broker");

                if !ack.session_present {
                    for filter in &filters {
                        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::ExactlyOnce) {
                            warn!("Failed to resubscribe to MQTT topic {}: {}", filter, e);
                        }
                    }
                }
            }
            // Only resubscriptions are acknowledged here
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if rejected(&ack) {
                    warn!(
                        "MQTT broker rejected resubscription (pkid {}); messages on those topics will not be relayed",
                        ack.pkid
                    );
                } else {
                    debug!("Resubscription acknowledged (pkid {})", ack.pkid);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                *status.write() = SessionStatus::Backoff;
                warn!(
                    "MQTT connection error: {}; reconnecting in {:?}",
                    e, reconnect_delay
                );
                tokio::time::sleep(reconnect_delay).await;
                *status.write() = SessionStatus::Connecting;
            }
        }
    }

    *status.write() = SessionStatus::Disconnected;
}
