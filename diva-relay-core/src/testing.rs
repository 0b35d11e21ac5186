//! Test doubles shared by the unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bus::{InboundMessage, OutboundMessage};
use crate::channel::{Channel, ChannelError, Result as ChannelResult};
use crate::turn::{TurnHandler, TurnResult};

/// Channel that records everything it is asked to send
pub struct RecordingChannel {
    name: String,
    running: AtomicBool,
    fail: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            running: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Poll until `count` messages were sent or the deadline passes
    pub async fn wait_for(&self, count: usize) -> Vec<OutboundMessage> {
        for _ in 0..200 {
            if self.sent.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&self, _cancel: CancellationToken) -> ChannelResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> ChannelResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> ChannelResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed("scripted failure".to_string()));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

type HandlerFn =
    dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = TurnResult> + Send>> + Send + Sync;

/// Turn handler driven by a closure, recording every message it saw
pub struct ScriptedHandler {
    script: Box<HandlerFn>,
    seen: Mutex<Vec<InboundMessage>>,
}

impl ScriptedHandler {
    pub fn new<F, Fut>(script: F) -> Arc<Self>
    where
        F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TurnResult> + Send + 'static,
    {
        Arc::new(Self {
            script: Box::new(move |msg| Box::pin(script(msg))),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Handler that echoes the message content back as a completed turn
    pub fn echo() -> Arc<Self> {
        Self::new(|msg: InboundMessage| async move { TurnResult::completed(msg.content) })
    }

    pub fn seen(&self) -> Vec<InboundMessage> {
        self.seen.lock().clone()
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
impl TurnHandler for ScriptedHandler {
    async fn handle(&self, message: InboundMessage) -> TurnResult {
        self.seen.lock().push(message.clone());
        (self.script)(message).await
    }
}
