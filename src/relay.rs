//! Topic routing between the inbound and outbound sessions

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, trace};

use crate::config::TopicMap;
use crate::inbound::{InboundMessage, MessageHandler};
use crate::outbound::Publisher;

/// Republishes inbound messages to their mapped downstream topic
///
/// Payloads are forwarded verbatim. A message on a topic with no mapping is
/// dropped; a failed publish is logged and the message is lost.
pub struct Relay {
    publisher: Arc<dyn Publisher>,
    topics: TopicMap,
}

impl Relay {
    pub fn new(publisher: Arc<dyn Publisher>, topics: TopicMap) -> Self {
        Self { publisher, topics }
    }

    /// Downstream topic for an MQTT topic, exact match only
    pub fn route(&self, mqtt_topic: &str) -> Option<&str> {
        self.topics.get(mqtt_topic).map(String::as_str)
    }
}

#[async_trait]
impl MessageHandler for Relay {
    async fn handle(&self, message: InboundMessage) {
        let Some(queue_topic) = self.route(&message.topic) else {
            debug!("No mapping for MQTT topic {}, dropping message", message.topic);
            return;
        };

        trace!(
            "Relaying {} bytes from {} to {}",
            message.payload.len(),
            message.topic,
            queue_topic
        );

        if let Err(e) = self.publisher.publish(queue_topic, message.payload).await {
            error!(
                "Failed to relay message from {} to {} via {}: {}",
                message.topic,
                queue_topic,
                self.publisher.name(),
                e
            );
        }
    }
}
