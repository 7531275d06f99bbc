//! Error definitions for the bridge

use thiserror::Error;

/// Errors raised while starting or operating a bridge session
///
/// Only [`BridgeError::MissingSystemId`] and [`BridgeError::InvalidBrokerAddress`]
/// prevent a session from running. Transport problems after startup are never
/// returned as errors; they only change the session status.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No vessel identity could be resolved from the configuration
    #[error("Please configure either a UUID or an MMSI for the vessel to use the bridge")]
    MissingSystemId,

    /// The broker address could not be understood
    #[error("Invalid broker address: {0}")]
    InvalidBrokerAddress(String),

    /// A subscription was registered with a TTL that expires immediately
    #[error("Subscription to {0} needs a non-zero TTL")]
    InvalidSubscriptionTtl(String),

    /// The broker client refused a request
    #[error("Broker client error: {0}")]
    Client(String),

    /// TLS could not be configured for the broker connection
    #[error("TLS error: {0}")]
    Tls(String),
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::Client(err.to_string())
    }
}
