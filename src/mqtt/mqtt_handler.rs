//! Broker connection handling
//!
//! The rumqttc event loop runs in a watcher task that turns polled packets into
//! [`BrokerEvent`]s for the session. Failed polls are retried after the fixed
//! reconnect period; rumqttc reconnects on the next poll.
//!
//! ```text
//! EventLoop ──poll──► watcher ──BrokerEvent──► session
//! AsyncClient ◄──try_publish── publishers / session
//! ```

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MqttSettings, REQUEST_CAPACITY};
use super::message_manager::{BrokerEvent, InboundMessage, OutboundMessage};
use crate::bridge::BridgeError;
use crate::config::BrokerConfig;

const EVENT_CAPACITY: usize = 100;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Non-blocking handle to a broker connection
///
/// Implementations must not wait for the network; a request that cannot be
/// queued fails immediately.
pub trait BrokerClient: Send + Sync {
    fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError>;
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BridgeError>;
    fn disconnect(&self) -> Result<(), BridgeError>;
}

/// A freshly opened connection: the client handle and its event stream
pub struct BrokerConnection {
    pub client: Arc<dyn BrokerClient>,
    pub events: mpsc::Receiver<BrokerEvent>,
}

/// Opens broker connections for a session
pub trait BrokerConnector {
    fn connect(&self, client_id: &str) -> Result<BrokerConnection, BridgeError>;
}

/// rumqttc backed connector
///
/// The broker address is only parsed when a session actually connects.
pub struct MqttConnector {
    broker: BrokerConfig,
}

impl MqttConnector {
    pub fn new(broker: BrokerConfig) -> Self {
        Self { broker }
    }
}

impl BrokerConnector for MqttConnector {
    fn connect(&self, client_id: &str) -> Result<BrokerConnection, BridgeError> {
        let settings = MqttSettings::from_config(&self.broker)?;
        info!(
            "Connecting to MQTT broker {}:{} as {}",
            settings.address.host, settings.address.port, client_id
        );

        let options = settings.mqtt_options(client_id);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let closing = CancellationToken::new();

        // Detached: the watcher ends by itself once the client disconnects
        tokio::spawn(watch_connection(
            eventloop,
            event_tx,
            settings.reconnect_period,
            closing.clone(),
        ));

        Ok(BrokerConnection {
            client: Arc::new(MqttClient { client, closing }),
            events: event_rx,
        })
    }
}

struct MqttClient {
    client: AsyncClient,
    closing: CancellationToken,
}

impl BrokerClient for MqttClient {
    fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        self.client
            .try_publish(message.topic, message.qos, message.retain, message.payload)?;
        Ok(())
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), BridgeError> {
        self.client.try_subscribe(filter, qos)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BridgeError> {
        self.closing.cancel();
        self.client.try_disconnect()?;
        Ok(())
    }
}

/// Polls the event loop until the connection is closed on request
///
/// Once `closing` is cancelled the watcher keeps polling only while connected,
/// so the outgoing disconnect gets flushed, and never attempts a reconnect.
async fn watch_connection(
    mut eventloop: EventLoop,
    events: mpsc::Sender<BrokerEvent>,
    reconnect_period: Duration,
    closing: CancellationToken,
) {
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            _ = closing.cancelled(), if !connected => {
                debug!("Broker watcher stopping");
                break;
            }
            polled = eventloop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                connected = true;
                BrokerEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                BrokerEvent::Message(InboundMessage::from_topic(publish.topic, &publish.payload))
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("MQTT connection closed by broker");
                connected = false;
                BrokerEvent::Closed
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT connection closed");
                let _ = events.send(BrokerEvent::Closed).await;
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Error connecting to MQTT broker: {}", e);
                if events.send(BrokerEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
                if connected {
                    connected = false;
                    if events.send(BrokerEvent::Closed).await.is_err() {
                        break;
                    }
                }

                tokio::select! {
                    _ = closing.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_period) => {
                        debug!("Retrying MQTT connection");
                        continue;
                    }
                }
            }
        };

        if events.send(event).await.is_err() {
            warn!("Session stopped listening for broker events");
            break;
        }
    }
}
