//! Routing table from channel name to adapter

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::events::OutboundMessage;
use crate::channel::{ChannelError, ChannelPtr};

/// Maps platform names to registered adapters
#[derive(Default)]
pub struct ChannelRouter {
    channels: RwLock<HashMap<String, ChannelPtr>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one
    pub fn register(&self, channel: ChannelPtr) -> Option<ChannelPtr> {
        let name = channel.name().to_string();
        debug!(channel = %name, "Registering channel");
        self.channels.write().insert(name, channel)
    }

    pub fn unregister(&self, name: &str) -> Option<ChannelPtr> {
        self.channels.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<ChannelPtr> {
        self.channels.read().get(name).cloned()
    }

    /// Registered channel names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.channels.write().clear();
    }

    /// Resolve `message.channel` and hand the message to that adapter.
    ///
    /// The adapter's error is returned as is; retries are the adapter's job.
    pub async fn deliver(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        let channel = self.get(&message.channel).ok_or_else(|| {
            ChannelError::NotConfigured(format!("Channel {} not found", message.channel))
        })?;
        channel.send(message).await
    }
}
