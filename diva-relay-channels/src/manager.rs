//! Channel manager

use diva_relay_core::bus::{MessageBus, OutboundMessage};
use diva_relay_core::channel::{Channel, ChannelError, ChannelPtr, Result};
use diva_relay_core::config::schema::Config;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::line::LineHandler;

/// Builds adapters from config, registers them on the bus and drives their lifecycle
pub struct ChannelManager {
    /// Configuration
    config: Config,
    bus: MessageBus,
    /// Channel handlers
    channels: RwLock<HashMap<String, ChannelPtr>>,
}

impl ChannelManager {
    /// Create a new channel manager
    pub fn new(config: Config, bus: MessageBus) -> Self {
        Self {
            config,
            bus,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Initialize channels based on configuration
    pub async fn initialize(&self) -> Result<()> {
        let line = &self.config.channels.line;
        if line.enabled {
            if !line.channel_secret.is_empty() && !line.channel_access_token.is_empty() {
                let handler = LineHandler::new(line.clone(), self.bus.clone())?;
                self.register(Arc::new(handler)).await;
                tracing::info!("LINE channel initialized");
            } else {
                tracing::warn!(
                    "LINE channel enabled but channel_secret/channel_access_token not configured"
                );
            }
        }

        Ok(())
    }

    /// Add an adapter and make it reachable for delivery
    pub async fn register(&self, channel: ChannelPtr) {
        let name = channel.name().to_string();
        self.bus.register_channel(Arc::clone(&channel));
        self.channels.write().await.insert(name, channel);
    }

    /// Start all channel handlers
    ///
    /// A channel that fails to start is logged and left stopped.
    pub async fn start_all(&self, cancel: CancellationToken) -> Result<()> {
        let channels = self.channels.read().await;

        for (name, channel) in channels.iter() {
            tracing::info!("Starting {} channel...", name);
            if let Err(e) = channel.start(cancel.clone()).await {
                tracing::error!("Failed to start {} channel: {}", name, e);
            }
        }

        Ok(())
    }

    /// Stop all channel handlers and drop their registrations
    pub async fn stop_all(&self) -> Result<()> {
        let mut channels = self.channels.write().await;

        for (name, channel) in channels.iter() {
            tracing::info!("Stopping {} channel...", name);
            if let Err(e) = channel.stop().await {
                tracing::error!("Failed to stop {} channel: {}", name, e);
            }
            self.bus.unregister_channel(name);
        }

        channels.clear();
        Ok(())
    }

    /// Get a channel by name
    pub async fn get_channel(&self, name: &str) -> Option<ChannelPtr> {
        self.channels.read().await.get(name).cloned()
    }

    /// Send a message through a specific channel
    pub async fn send(&self, channel: &str, message: OutboundMessage) -> Result<()> {
        let handler = self
            .get_channel(channel)
            .await
            .ok_or_else(|| ChannelError::NotConfigured(format!("Channel {} not found", channel)))?;
        handler.send(message).await
    }

    /// Check if a channel is running
    pub async fn is_channel_running(&self, name: &str) -> bool {
        self.channels
            .read()
            .await
            .get(name)
            .is_some_and(|channel| channel.is_running())
    }

    /// Get list of active channels, sorted
    pub async fn list_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
