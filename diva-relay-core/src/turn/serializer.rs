//! Per-chat turn serialization
//!
//! Every chat id gets a lane: a bounded FIFO queue drained by one worker
//! task, so the processing core never runs twice at once for the same chat
//! while different chats proceed in parallel. A full lane makes the
//! producer wait (backpressure) instead of growing without bound.
//!
//! Once the core returns, the worker hands any reply to the lane's delivery
//! task and immediately picks up the next message; network I/O towards the
//! platform never holds the chat's slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::result::TurnResult;
use crate::bus::events::{meta, InboundMessage, OutboundMessage};
use crate::bus::router::ChannelRouter;
use crate::config::GatewayConfig;
use crate::state::StateStore;
use crate::utils::truncate;
use crate::{Error, Result};

/// The processing core, seen as an opaque turn handler.
///
/// Implementations must tolerate concurrent calls for different chats; for
/// one chat the serializer only calls again after the previous call returned.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> TurnResult;
}

/// Tunables for the serializer
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// Absolute limit for one turn; the slot is released when it elapses
    pub turn_timeout: Duration,
    /// Messages buffered per chat before producers wait
    pub queue_depth: usize,
    /// Idle time after which an empty lane is retired
    pub idle_timeout: Duration,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for TurnSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            turn_timeout: Duration::from_secs(config.turn_timeout_s),
            queue_depth: config.chat_queue_depth.max(1),
            idle_timeout: Duration::from_secs(config.lane_idle_s.max(1)),
        }
    }
}

struct Lane {
    tx: mpsc::Sender<InboundMessage>,
    generation: u64,
    /// Producers holding a clone of `tx` that have not finished sending
    pending: Arc<AtomicUsize>,
}

enum Idle {
    Message(InboundMessage),
    Busy,
    Retired,
}

/// Decrements a lane's pending counter however the send ends
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Shared {
    handler: Arc<dyn TurnHandler>,
    router: Arc<ChannelRouter>,
    state: Arc<StateStore>,
    settings: TurnSettings,
    lanes: Mutex<HashMap<String, Lane>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
    tracker: TaskTracker,
}

/// Guarantees at most one in-flight turn per chat id
#[derive(Clone)]
pub struct TurnSerializer {
    shared: Arc<Shared>,
}

impl TurnSerializer {
    pub fn new(
        handler: Arc<dyn TurnHandler>,
        router: Arc<ChannelRouter>,
        state: Arc<StateStore>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                router,
                state,
                settings,
                lanes: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Queue a message on its chat's lane.
    ///
    /// Returns once the message is enqueued; waits while the lane is full.
    pub async fn submit(&self, message: InboundMessage) -> Result<()> {
        if message.chat_id.trim().is_empty() {
            return Err(Error::Validation("chat_id must not be empty".to_string()));
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Channel("turn serializer is shut down".to_string()));
        }

        let (tx, pending) = self.lane_sender(&message.chat_id);
        let _guard = PendingGuard(pending);
        tx.send(message)
            .await
            .map_err(|_| Error::Channel("chat lane closed".to_string()))
    }

    /// Number of chats with a live lane
    pub fn active_lanes(&self) -> usize {
        self.shared.lanes.lock().len()
    }

    /// Stop accepting messages and wait up to `grace` for queued turns and
    /// deliveries to finish.
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.lanes.lock().clear();
        self.shared.tracker.close();

        if tokio::time::timeout(grace, self.shared.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Turn serializer did not drain within {:?}; abandoning remaining turns",
                grace
            );
        } else {
            info!("Turn serializer drained");
        }
    }

    fn lane_sender(&self, chat_id: &str) -> (mpsc::Sender<InboundMessage>, Arc<AtomicUsize>) {
        let mut lanes = self.shared.lanes.lock();
        if let Some(lane) = lanes.get(chat_id) {
            lane.pending.fetch_add(1, Ordering::SeqCst);
            return (lane.tx.clone(), Arc::clone(&lane.pending));
        }

        let (tx, rx) = mpsc::channel(self.shared.settings.queue_depth);
        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::new(AtomicUsize::new(1));
        lanes.insert(
            chat_id.to_string(),
            Lane {
                tx: tx.clone(),
                generation,
                pending: Arc::clone(&pending),
            },
        );
        debug!(chat_id, generation, "Opened chat lane");

        let shared = Arc::clone(&self.shared);
        let key = chat_id.to_string();
        self.shared
            .tracker
            .spawn(async move { shared.run_lane(key, generation, rx).await });

        (tx, pending)
    }
}

impl Shared {
    async fn run_lane(
        self: Arc<Self>,
        chat_id: String,
        generation: u64,
        mut rx: mpsc::Receiver<InboundMessage>,
    ) {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let router = Arc::clone(&self.router);
        self.tracker.spawn(run_deliveries(router, delivery_rx));

        loop {
            let message = match tokio::time::timeout(self.settings.idle_timeout, rx.recv()).await
            {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_) => match self.try_retire(&chat_id, generation, &mut rx) {
                    Idle::Message(message) => message,
                    Idle::Busy => continue,
                    Idle::Retired => break,
                },
            };
            self.process(message, &delivery_tx).await;
        }

        debug!(chat_id = %chat_id, generation, "Chat lane closed");
    }

    /// Remove an idle lane unless a producer is mid-send or a message slipped in.
    ///
    /// Runs under the lanes lock, so no producer can pick up this lane's
    /// sender between the checks and the removal.
    fn try_retire(
        &self,
        chat_id: &str,
        generation: u64,
        rx: &mut mpsc::Receiver<InboundMessage>,
    ) -> Idle {
        let mut lanes = self.lanes.lock();
        if let Ok(message) = rx.try_recv() {
            return Idle::Message(message);
        }
        match lanes.get(chat_id) {
            Some(lane) if lane.generation == generation => {
                if lane.pending.load(Ordering::SeqCst) > 0 {
                    return Idle::Busy;
                }
                lanes.remove(chat_id);
                Idle::Retired
            }
            // Already detached by shutdown; keep draining until senders are gone
            _ => Idle::Busy,
        }
    }

    async fn process(
        &self,
        message: InboundMessage,
        deliveries: &mpsc::UnboundedSender<OutboundMessage>,
    ) {
        let started = Instant::now();
        let source = message.source().to_string();
        debug!(
            session = %message.session_key(),
            source = %source,
            "Turn started: {}",
            truncate(&message.content, 60)
        );

        let result = self.run_turn(message.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(session = %message.session_key(), kind = result.kind(), elapsed_ms, "Turn finished");

        if source == meta::SOURCE_CHANNEL && !matches!(result, TurnResult::Error(_)) {
            if let Err(e) = self.state.record(&message.channel, &message.chat_id) {
                warn!(chat_id = %message.chat_id, "Failed to record routing state: {}", e);
            }
        }

        match &result {
            TurnResult::Silent => {
                info!(chat_id = %message.chat_id, source = %source, elapsed_ms, "Turn silent, nothing to deliver");
            }
            TurnResult::Error(e) => {
                error!(chat_id = %message.chat_id, source = %source, elapsed_ms, "Turn failed: {}", e);
            }
            TurnResult::Async(status) => {
                info!(chat_id = %message.chat_id, source = %source, elapsed_ms, "Turn continues in background: {}", status);
            }
            TurnResult::Completed { .. } => {
                let text = result.delivery_text().unwrap_or_default();
                if message.wants_delivery() {
                    debug!(chat_id = %message.chat_id, channel = %message.channel, elapsed_ms, "Turn completed, queueing reply");
                    if deliveries
                        .send(OutboundMessage::reply_to(&message, text))
                        .is_err()
                    {
                        warn!(chat_id = %message.chat_id, "Delivery task gone; reply dropped");
                    }
                } else {
                    info!(
                        chat_id = %message.chat_id,
                        source = %source,
                        elapsed_ms,
                        "Turn completed without a delivery target; result discarded"
                    );
                }
            }
        }
    }

    /// Run the handler on its own task so a panic or a hang cannot wedge the lane
    async fn run_turn(&self, message: InboundMessage) -> TurnResult {
        let handler = Arc::clone(&self.handler);
        let mut task = tokio::spawn(async move { handler.handle(message).await });

        match tokio::time::timeout(self.settings.turn_timeout, &mut task).await {
            Ok(Ok(result)) => result.normalize(),
            Ok(Err(e)) => TurnResult::Error(format!("turn task failed: {}", e)),
            Err(_) => {
                task.abort();
                TurnResult::Error(format!(
                    "turn exceeded {}s timeout",
                    self.settings.turn_timeout.as_secs_f32()
                ))
            }
        }
    }
}

async fn run_deliveries(
    router: Arc<ChannelRouter>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    while let Some(outbound) = rx.recv().await {
        let channel = outbound.channel.clone();
        let chat_id = outbound.chat_id.clone();
        match router.deliver(outbound).await {
            Ok(()) => debug!(channel = %channel, chat_id = %chat_id, "Reply delivered"),
            Err(e) => error!(channel = %channel, chat_id = %chat_id, "Reply delivery failed: {}", e),
        }
    }
}
