//! Test doubles for adapter tests

use async_trait::async_trait;
use diva_relay_core::bus::{InboundMessage, MessageBus};
use diva_relay_core::state::StateStore;
use diva_relay_core::turn::{TurnHandler, TurnResult, TurnSettings};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Turn handler that records what it saw and stays silent
pub struct RecordingHandler {
    seen: Mutex<Vec<InboundMessage>>,
    media_present: Mutex<Vec<bool>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            media_present: Mutex::new(Vec::new()),
        })
    }

    /// Recorded messages, without their temp-file guards
    pub fn seen(&self) -> Vec<InboundMessage> {
        self.seen.lock().clone()
    }

    /// Per message: whether every media file existed while the turn ran
    pub fn media_present(&self) -> Vec<bool> {
        self.media_present.lock().clone()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<InboundMessage> {
        for _ in 0..200 {
            if self.seen.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.seen()
    }
}

#[async_trait]
impl TurnHandler for RecordingHandler {
    async fn handle(&self, message: InboundMessage) -> TurnResult {
        let present = message.media.iter().all(|p| Path::new(p).exists());
        let mut stored = message.clone();
        stored.temp_files = None;
        self.media_present.lock().push(present);
        self.seen.lock().push(stored);
        TurnResult::Silent
    }
}

pub fn test_bus(handler: Arc<RecordingHandler>) -> (MessageBus, TempDir) {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(StateStore::new(dir.path()));
    (MessageBus::new(handler, state, TurnSettings::default()), dir)
}
