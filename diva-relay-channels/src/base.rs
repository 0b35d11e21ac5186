//! Shared plumbing for channel adapters

use diva_relay_core::bus::{meta, InboundMessage, MessageBus};
use diva_relay_core::channel::{ChannelError, Result};

/// Common adapter state: platform name, allow-list and the bus to publish on
pub struct BaseChannel {
    /// Channel name
    name: String,
    /// Allowed senders list (empty = allow all)
    allow_from: Vec<String>,
    bus: MessageBus,
}

impl BaseChannel {
    /// Create a new base channel
    pub fn new(name: impl Into<String>, allow_from: Vec<String>, bus: MessageBus) -> Self {
        Self {
            name: name.into(),
            allow_from,
            bus,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if a sender is allowed
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        // If no allow list, allow everyone
        if self.allow_from.is_empty() {
            return true;
        }

        if self.allow_from.iter().any(|allowed| allowed == sender_id) {
            return true;
        }

        // Handle compound IDs (e.g., "12345|username")
        if sender_id.contains('|') {
            return sender_id
                .split('|')
                .any(|part| !part.is_empty() && self.allow_from.iter().any(|a| a == part));
        }

        false
    }

    /// Check the sender, tag the platform and publish onto the bus.
    ///
    /// A denied message is dropped here, together with any temp files it owns.
    pub async fn publish(&self, mut msg: InboundMessage) -> Result<()> {
        if !self.is_allowed(&msg.sender_id) {
            tracing::warn!(
                "Access denied for sender {} on channel {}. Add them to allow_from in config to grant access.",
                msg.sender_id,
                self.name
            );
            return Err(ChannelError::AccessDenied(msg.sender_id));
        }

        msg.channel = self.name.clone();
        msg.metadata
            .insert(meta::PLATFORM.to_string(), self.name.clone());
        msg.metadata
            .entry(meta::SOURCE.to_string())
            .or_insert_with(|| meta::SOURCE_CHANNEL.to_string());

        self.bus
            .publish(msg)
            .await
            .map_err(|e| ChannelError::Error(format!("Failed to publish inbound message: {}", e)))
    }
}
