//! mqtt-relay - MQTT to NATS/Kafka topic relay
//!
//! Subscribes to a fixed set of MQTT topics on one broker and republishes
//! every received payload, unchanged, to the mapped topic on a NATS server
//! or Kafka cluster.

pub mod config;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod relay;
pub mod tls;

pub use config::{Config, TopicMap};
pub use error::SessionError;
pub use inbound::{InboundMessage, InboundSession, MessageHandler, SessionStatus};
pub use outbound::Publisher;
pub use relay::Relay;
