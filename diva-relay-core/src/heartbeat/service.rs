//! Heartbeat service for periodic proactive checks

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{meta, InboundMessage, MessageBus, SYSTEM_CHANNEL};
use crate::heartbeat::types::{
    build_prompt, is_heartbeat_empty, HeartbeatConfig, DEFAULT_HEARTBEAT_TEMPLATE, HEARTBEAT_FILE,
};
use crate::utils::write_atomic_async;

/// Delay before the first beat after start
const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// What a single beat did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeatOutcome {
    /// Checklist was missing; the default template was written
    TemplateCreated,
    /// Checklist has no actionable content
    Empty,
    /// Prompt handed to the bus
    Published,
    /// Checklist could not be read or the prompt could not be published
    Failed(String),
}

/// Periodic heartbeat that asks the processing core to review the checklist
///
/// The prompt goes through the bus like any other message, so the result
/// is handled by the turn serializer: the silence sentinel is dropped and
/// real output is delivered to the last active chat.
#[derive(Clone)]
pub struct HeartbeatService {
    workspace: PathBuf,
    config: HeartbeatConfig,
    bus: MessageBus,
    initial_delay: Duration,
    running: Arc<RwLock<bool>>,
    task: Arc<RwLock<Option<(CancellationToken, JoinHandle<()>)>>>,
    last_beat: Arc<RwLock<Option<(DateTime<Utc>, BeatOutcome)>>>,
}

impl HeartbeatService {
    /// Create a new heartbeat service
    pub fn new(workspace: PathBuf, config: HeartbeatConfig, bus: MessageBus) -> Self {
        Self {
            workspace,
            config,
            bus,
            initial_delay: INITIAL_DELAY,
            running: Arc::new(RwLock::new(false)),
            task: Arc::new(RwLock::new(None)),
            last_beat: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Get the path to HEARTBEAT.md
    pub fn heartbeat_file(&self) -> PathBuf {
        self.workspace.join(HEARTBEAT_FILE)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.effective_interval_s())
    }

    /// Start the heartbeat loop; `cancel` is the process-wide shutdown signal
    pub async fn start(&self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("Heartbeat disabled");
            return;
        }

        let mut task_guard = self.task.write().await;
        if task_guard.is_some() {
            debug!("Heartbeat service already running");
            return;
        }

        let token = cancel.child_token();
        let service = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { service.run_loop(loop_token).await });
        *task_guard = Some((token, handle));
        *self.running.write().await = true;

        info!("Heartbeat started (every {}s)", self.config.effective_interval_s());
    }

    /// Stop the heartbeat service
    pub async fn stop(&self) {
        *self.running.write().await = false;

        let task = self.task.write().await.take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Heartbeat loop ended abnormally: {}", e);
            }
            info!("Heartbeat stopped");
        }
    }

    /// Check if the service is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let first = tokio::time::Instant::now() + self.initial_delay;
        let mut ticker = tokio::time::interval_at(first, self.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Heartbeat loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.beat().await;
                }
            }
        }
    }

    /// Manually trigger a heartbeat
    pub async fn trigger_now(&self) -> BeatOutcome {
        self.beat().await
    }

    /// Run one heartbeat cycle
    pub async fn beat(&self) -> BeatOutcome {
        debug!("Executing heartbeat");
        let outcome = match self.read_checklist().await {
            Ok(Some(checklist)) if is_heartbeat_empty(Some(&checklist)) => {
                info!("Heartbeat skipped: HEARTBEAT.md has no tasks");
                BeatOutcome::Empty
            }
            Ok(Some(checklist)) => self.publish(&checklist).await,
            Ok(None) => self.create_template().await,
            Err(e) => {
                error!("Error reading HEARTBEAT.md: {}", e);
                BeatOutcome::Failed(e.to_string())
            }
        };

        *self.last_beat.write().await = Some((Utc::now(), outcome.clone()));
        outcome
    }

    async fn read_checklist(&self) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.heartbeat_file()).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_template(&self) -> BeatOutcome {
        let path = self.heartbeat_file();
        match write_atomic_async(&path, DEFAULT_HEARTBEAT_TEMPLATE.as_bytes()).await {
            Ok(()) => {
                info!(file = %path.display(), "Created default HEARTBEAT.md template");
                BeatOutcome::TemplateCreated
            }
            Err(e) => {
                error!("Failed to create default HEARTBEAT.md: {}", e);
                BeatOutcome::Failed(e.to_string())
            }
        }
    }

    async fn publish(&self, checklist: &str) -> BeatOutcome {
        let prompt = build_prompt(&Local::now(), checklist);

        let msg = match self.bus.state().last_target() {
            Some((channel, chat_id)) => {
                debug!(channel = %channel, chat_id = %chat_id, "Heartbeat targeting last active chat");
                InboundMessage::new(channel.clone(), "heartbeat", chat_id, prompt)
                    .with_metadata(meta::PLATFORM, channel)
            }
            None => {
                info!("No last channel recorded, heartbeat result will not be delivered");
                InboundMessage::new(SYSTEM_CHANNEL, "heartbeat", "heartbeat", prompt)
                    .with_metadata(meta::DELIVER, "false")
            }
        }
        .with_metadata(meta::SOURCE, meta::SOURCE_HEARTBEAT);

        match self.bus.publish(msg).await {
            Ok(()) => BeatOutcome::Published,
            Err(e) => {
                error!("Failed to publish heartbeat: {}", e);
                BeatOutcome::Failed(e.to_string())
            }
        }
    }

    /// Get service status
    pub async fn status(&self) -> serde_json::Value {
        let is_running = *self.running.read().await;
        let last_beat = self.last_beat.read().await.clone();

        serde_json::json!({
            "enabled": self.config.enabled,
            "running": is_running,
            "interval_s": self.config.effective_interval_s(),
            "heartbeat_file_exists": self.heartbeat_file().exists(),
            "last_beat_at": last_beat.as_ref().map(|(at, _)| at.to_rfc3339()),
            "last_outcome": last_beat.map(|(_, outcome)| format!("{:?}", outcome)),
        })
    }
}
