//! # MQTT Integration Module
//!
//! Broker side of the bridge. The session only talks to the [`BrokerClient`] and
//! [`BrokerConnector`] traits, so tests can swap rumqttc for a recording fake.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address parsing, options and TLS
//! ├── message_manager.rs  - Outbound/inbound messages and broker events
//! └── mqtt_handler.rs     - Client traits, rumqttc connector and event watcher
//! ```

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::{BrokerAddress, MqttSettings};
pub use message_manager::{BrokerEvent, InboundMessage, OutboundMessage};
pub use mqtt_handler::{
    BrokerClient, BrokerConnection, BrokerConnector, ConnectionState, MqttConnector,
};
