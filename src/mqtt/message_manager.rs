use chrono::NaiveDateTime;
use rumqttc::QoS;
use std::fmt;

/// A message the bridge wants on the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    /// Display commands are delivered at least once and retained on the broker
    pub fn retained(topic: String, payload: String) -> Self {
        OutboundMessage {
            topic,
            payload,
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }
}

/// A message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub content: String,
    pub timestamp: NaiveDateTime,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.content.chars().take(40).collect();
        write!(f, "{} - {}: {}", self.timestamp, self.topic, preview)
    }
}

impl InboundMessage {
    pub fn from_topic(topic: String, payload: &[u8]) -> Self {
        InboundMessage {
            topic,
            content: String::from_utf8_lossy(payload).trim().to_string(),
            timestamp: chrono::Local::now().naive_local(),
        }
    }
}

/// Connection lifecycle and traffic as seen by a bridge session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A connection was acknowledged; fires again after every reconnect
    Connected,
    /// The link to the broker went down
    Closed,
    /// The transport or the broker reported a failure
    Error(String),
    Message(InboundMessage),
}
