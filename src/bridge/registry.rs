//! Time-limited subscription bookkeeping
//!
//! Entries are never changed in place. Extending a subscription means removing
//! it and registering it again with a fresh expiry.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::error::BridgeError;

/// A subscription that is valid until `expires_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub topic: String,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `topic` until `ttl` from now
    pub fn register(&mut self, topic: impl Into<String>, ttl: Duration) -> Result<(), BridgeError> {
        self.register_at(topic, ttl, Instant::now())
    }

    pub fn register_at(
        &mut self,
        topic: impl Into<String>,
        ttl: Duration,
        now: Instant,
    ) -> Result<(), BridgeError> {
        let topic = topic.into();
        if ttl.is_zero() {
            return Err(BridgeError::InvalidSubscriptionTtl(topic));
        }

        debug!("Registering subscription to {} for {:?}", topic, ttl);
        self.entries.push(SubscriptionEntry {
            topic,
            expires_at: now + ttl,
        });
        Ok(())
    }

    /// Keepalive: drops every entry for `topic` and registers it again
    pub fn renew(&mut self, topic: impl Into<String>, ttl: Duration) -> Result<(), BridgeError> {
        let topic = topic.into();
        self.entries.retain(|entry| entry.topic != topic);
        self.register(topic, ttl)
    }

    /// Removes and returns the topics of every entry that expired before `now`
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.expires_at < now);
        self.entries = live;

        expired
            .into_iter()
            .map(|entry| {
                debug!("Expiring subscription to topic {}", entry.topic);
                entry.topic
            })
            .collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.iter().any(|entry| entry.topic == topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.topic.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
