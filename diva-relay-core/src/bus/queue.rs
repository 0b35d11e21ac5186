//! The single publish point shared by adapters, the scheduler and the heartbeat

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::events::{InboundMessage, OutboundMessage};
use super::router::ChannelRouter;
use crate::channel::{ChannelError, ChannelPtr};
use crate::state::StateStore;
use crate::turn::{TurnHandler, TurnSerializer, TurnSettings};

/// Message bus that decouples producers from the processing core
///
/// Producers publish inbound messages, which are handed to the turn
/// serializer for their chat. Outbound messages are routed by channel name
/// to the registered adapter. Cloning is cheap; every clone shares the same
/// routing table and lanes.
#[derive(Clone)]
pub struct MessageBus {
    router: Arc<ChannelRouter>,
    serializer: TurnSerializer,
    state: Arc<StateStore>,
}

impl MessageBus {
    /// Create a new message bus in front of `handler`
    pub fn new(
        handler: Arc<dyn TurnHandler>,
        state: Arc<StateStore>,
        settings: TurnSettings,
    ) -> Self {
        let router = Arc::new(ChannelRouter::new());
        let serializer = TurnSerializer::new(
            handler,
            Arc::clone(&router),
            Arc::clone(&state),
            settings,
        );
        Self {
            router,
            serializer,
            state,
        }
    }

    /// Routing state shared with the scheduler and heartbeat
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn serializer(&self) -> &TurnSerializer {
        &self.serializer
    }

    /// Register an adapter under its name; a previous adapter with the same
    /// name is replaced
    pub fn register_channel(&self, channel: ChannelPtr) {
        if let Some(previous) = self.router.register(channel) {
            info!(channel = %previous.name(), "Replaced registered channel");
        }
    }

    pub fn unregister_channel(&self, name: &str) -> Option<ChannelPtr> {
        self.router.unregister(name)
    }

    pub fn get_channel(&self, name: &str) -> Option<ChannelPtr> {
        self.router.get(name)
    }

    /// Names of registered channels, sorted
    pub fn channels(&self) -> Vec<String> {
        self.router.names()
    }

    /// Publish an inbound message to the serializer for its chat.
    ///
    /// Waits while that chat's queue is full.
    pub async fn publish(&self, msg: InboundMessage) -> crate::Result<()> {
        debug!(
            channel = %msg.channel,
            chat_id = %msg.chat_id,
            source = %msg.source(),
            "Publishing inbound message"
        );
        self.serializer.submit(msg).await
    }

    /// Hand an outbound message to the adapter registered for its channel.
    ///
    /// The adapter's error is returned unchanged; there is no retry here.
    pub async fn deliver(&self, msg: OutboundMessage) -> Result<(), ChannelError> {
        self.router.deliver(msg).await
    }

    /// Drain queued turns within `grace`, then drop every registration
    pub async fn shutdown(&self, grace: Duration) {
        self.serializer.shutdown(grace).await;
        self.router.clear();
        info!("Message bus stopped");
    }
}
