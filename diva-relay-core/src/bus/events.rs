//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Metadata keys shared by every producer
pub mod meta {
    /// Stable lowercase platform name ("line", "telegram", ...)
    pub const PLATFORM: &str = "platform";
    /// Producer kind, one of the `SOURCE_*` values
    pub const SOURCE: &str = "source";
    /// Platform-issued message id
    pub const MESSAGE_ID: &str = "message_id";
    /// "false" when a completed turn must not be delivered anywhere
    pub const DELIVER: &str = "deliver";
    /// Scheduler job that synthesized the message
    pub const JOB_ID: &str = "job_id";

    pub const SOURCE_CHANNEL: &str = "channel";
    pub const SOURCE_CRON: &str = "cron";
    pub const SOURCE_HEARTBEAT: &str = "heartbeat";
}

/// Channel name used for internally generated messages without a real destination
pub const SYSTEM_CHANNEL: &str = "system";

/// Local files owned by an inbound event, removed when the last holder drops.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(file = %path.display(), "Failed to cleanup temp file: {}", e);
                }
            }
        }
    }
}

/// Message received from a chat channel or synthesized by a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g., "line", "telegram")
    pub channel: String,
    /// User identifier
    pub sender_id: String,
    /// Chat identifier; the unit of turn serialization
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
    /// Local media paths, in arrival order
    pub media: Vec<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, String>,
    /// Downloaded attachments, deleted once every clone of the message is gone
    #[serde(skip)]
    pub temp_files: Option<Arc<TempFiles>>,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
            temp_files: None,
        }
    }

    /// Get the unique session key for this message
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Add a media path to the message
    pub fn with_media(mut self, path: impl Into<String>) -> Self {
        self.media.push(path.into());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Hand ownership of downloaded files to the message
    pub fn with_temp_files(mut self, files: TempFiles) -> Self {
        self.temp_files = Some(Arc::new(files));
        self
    }

    /// Producer kind; messages without a tag came from a channel
    pub fn source(&self) -> &str {
        self.metadata
            .get(meta::SOURCE)
            .map(String::as_str)
            .unwrap_or(meta::SOURCE_CHANNEL)
    }

    /// Whether a completed turn for this message should be delivered
    pub fn wants_delivery(&self) -> bool {
        self.channel != SYSTEM_CHANNEL
            && self
                .metadata
                .get(meta::DELIVER)
                .map_or(true, |v| v != "false")
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Target chat identifier
    pub chat_id: String,
    /// Message text content
    pub content: String,
}

impl OutboundMessage {
    /// Create a new outbound message
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
        }
    }

    /// Address a reply to the conversation an inbound message came from
    pub fn reply_to(msg: &InboundMessage, content: impl Into<String>) -> Self {
        Self::new(msg.channel.clone(), msg.chat_id.clone(), content)
    }
}
