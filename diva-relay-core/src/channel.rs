//! Channel adapter contract
//!
//! Every messaging platform is integrated by implementing [`Channel`]. The
//! bus only ever talks to adapters through this trait, so adding a platform
//! never touches shared routing code.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::bus::OutboundMessage;

/// Trait for channel adapters
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase platform name, used as routing key and `last_channel`
    fn name(&self) -> &str;

    /// Check if the channel is running
    fn is_running(&self) -> bool;

    /// Start listening; returns once the listener is up.
    ///
    /// Calling `start` on a running adapter logs and returns `Ok(())`.
    /// `cancel` is the process-wide shutdown signal.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Drain the listener within a bounded timeout
    async fn stop(&self) -> Result<()>;

    /// Deliver one message to the platform
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel error: {0}")]
    Error(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Channel not running: {0}")]
    NotRunning(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Access denied for sender: {0}")]
    AccessDenied(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Shared channel handle
pub type ChannelPtr = Arc<dyn Channel>;
