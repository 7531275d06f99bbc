use std::sync::Arc;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::mqtt::{BrokerClient, ConnectionState, OutboundMessage};

/// Best-effort publishing: messages are only handed to the broker client while
/// the session reports a live connection, otherwise they are dropped silently.
///
/// Cloned into every debounced publisher. Only the session writes the
/// connection state; gates only read it.
#[derive(Clone)]
pub struct PublishGate {
    client: Arc<dyn BrokerClient>,
    connection: watch::Receiver<ConnectionState>,
}

impl PublishGate {
    pub fn new(client: Arc<dyn BrokerClient>, connection: watch::Receiver<ConnectionState>) -> Self {
        Self { client, connection }
    }

    /// Returns whether the message was handed to the broker client
    pub fn publish(&self, message: OutboundMessage) -> bool {
        if *self.connection.borrow() != ConnectionState::Connected {
            trace!("Dropping message to {} while disconnected", message.topic);
            return false;
        }

        match self.client.publish(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to publish message: {}", e);
                false
            }
        }
    }
}
