//! LINE Official Account integration
//!
//! Receives events through an HTTP webhook signed with the channel secret
//! and answers through the Messaging API: a cached reply token first, the
//! push endpoint otherwise.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use diva_relay_core::bus::{meta, InboundMessage, MessageBus, OutboundMessage, TempFiles};
use diva_relay_core::channel::{Channel, ChannelError, Result};
use diva_relay_core::config::LineConfig;
use diva_relay_core::utils::truncate;

use crate::base::BaseChannel;
use crate::common::{create_http_client, download_to_temp, media_temp_dir};

/// Header carrying the base64 HMAC-SHA256 of the request body
pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Reply tokens older than this are not used
pub const REPLY_TOKEN_MAX_AGE: Duration = Duration::from_secs(25);

const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const LOADING_SECONDS: u64 = 60;

type HmacSha256 = Hmac<Sha256>;

/// Check `signature` (base64) against the HMAC-SHA256 of `body`
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature LINE sends for `body`
#[cfg(test)]
pub(crate) fn sign_body(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reply_token: Option<String>,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EventSource {
    User {
        #[serde(default, rename = "userId")]
        user_id: String,
    },
    Group {
        #[serde(default, rename = "groupId")]
        group_id: String,
        #[serde(default, rename = "userId")]
        user_id: String,
    },
    Room {
        #[serde(default, rename = "roomId")]
        room_id: String,
        #[serde(default, rename = "userId")]
        user_id: String,
    },
    #[serde(other)]
    Unknown,
}

impl EventSource {
    /// (sender, chat, source type)
    fn resolve(&self) -> (&str, &str, &'static str) {
        match self {
            EventSource::User { user_id } => (user_id.as_str(), user_id.as_str(), "user"),
            EventSource::Group { group_id, user_id } => {
                (user_id.as_str(), group_id.as_str(), "group")
            }
            EventSource::Room { room_id, user_id } => (user_id.as_str(), room_id.as_str(), "room"),
            EventSource::Unknown => ("", "", "unknown"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    quote_token: Option<String>,
    #[serde(default)]
    mention: Option<Mention>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Mention {
    #[serde(default)]
    mentionees: Vec<Mentionee>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mentionee {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    index: i64,
    #[serde(default)]
    length: i64,
    #[serde(default)]
    user_id: Option<String>,
}

/// Bot profile used for mention detection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotInfo {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub basic_id: String,
    #[serde(default)]
    pub display_name: String,
}

/// Characters `[index, index + length)` of `text`, if in range
fn mention_span(text: &str, index: i64, length: i64) -> Option<(usize, usize)> {
    if index < 0 || length <= 0 {
        return None;
    }
    let start = usize::try_from(index).ok()?;
    let end = start.checked_add(usize::try_from(length).ok()?)?;
    (end <= text.chars().count()).then_some((start, end))
}

fn span_text(text: &str, (start, end): (usize, usize)) -> String {
    text.chars().skip(start).take(end - start).collect()
}

/// Whether a user mentionee points at the bot
fn targets_bot(bot: &BotInfo, text: &str, mentionee: &Mentionee) -> bool {
    if !bot.user_id.is_empty() && mentionee.user_id.as_deref() == Some(bot.user_id.as_str()) {
        return true;
    }
    if bot.display_name.is_empty() {
        return false;
    }
    mention_span(text, mentionee.index, mentionee.length)
        .is_some_and(|span| span_text(text, span).contains(&bot.display_name))
}

/// Whether a group message addresses the bot
fn is_bot_mentioned(bot: &BotInfo, text: &str, mention: Option<&Mention>) -> bool {
    if let Some(mention) = mention {
        for mentionee in &mention.mentionees {
            match mentionee.kind.as_str() {
                "all" => return true,
                "user" if targets_bot(bot, text, mentionee) => return true,
                _ => {}
            }
        }
    }

    // Official accounts are not always listed with a userId
    !bot.display_name.is_empty() && text.contains(&format!("@{}", bot.display_name))
}

/// Remove mentions of the bot from `text`
fn strip_bot_mention(bot: &BotInfo, text: &str, mention: Option<&Mention>) -> String {
    if let Some(mention) = mention {
        let mut chars: Vec<char> = text.chars().collect();
        let mut stripped = false;
        for mentionee in mention.mentionees.iter().rev() {
            if mentionee.kind != "user" || !targets_bot(bot, text, mentionee) {
                continue;
            }
            if let Some((start, end)) = mention_span(text, mentionee.index, mentionee.length) {
                if end <= chars.len() {
                    chars.drain(start..end);
                    stripped = true;
                }
            }
        }
        if stripped {
            return chars.into_iter().collect::<String>().trim().to_string();
        }
    }

    if bot.display_name.is_empty() {
        return text.trim().to_string();
    }
    text.replace(&format!("@{}", bot.display_name), "")
        .trim()
        .to_string()
}

/// Single-use reply token bound to a chat
#[derive(Debug, Clone)]
struct ReplyHandle {
    token: String,
    issued_at: Instant,
}

impl ReplyHandle {
    fn is_fresh(&self) -> bool {
        self.issued_at.elapsed() < REPLY_TOKEN_MAX_AGE
    }
}

struct RunningServer {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    addr: SocketAddr,
}

struct LineInner {
    base: BaseChannel,
    config: LineConfig,
    client: reqwest::Client,
    media_dir: PathBuf,
    running: AtomicBool,
    bot: RwLock<BotInfo>,
    reply_handles: Mutex<HashMap<String, ReplyHandle>>,
    quote_tokens: Mutex<HashMap<String, String>>,
    server: tokio::sync::Mutex<Option<RunningServer>>,
    /// Webhook deliveries still being processed
    events: TaskTracker,
}

/// LINE channel handler
///
/// Cloning is cheap; clones share the webhook server and token stores.
#[derive(Clone)]
pub struct LineHandler {
    inner: Arc<LineInner>,
}

impl LineHandler {
    /// Create a new LINE handler publishing onto `bus`
    pub fn new(config: LineConfig, bus: MessageBus) -> Result<Self> {
        Self::with_media_dir(config, bus, media_temp_dir())
    }

    /// Create a handler that downloads attachments into `media_dir`
    pub fn with_media_dir(config: LineConfig, bus: MessageBus, media_dir: PathBuf) -> Result<Self> {
        if config.channel_secret.is_empty() || config.channel_access_token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "line channel_secret and channel_access_token are required".to_string(),
            ));
        }
        if !config.webhook_path.starts_with('/') {
            return Err(ChannelError::InvalidConfig(format!(
                "webhook path must start with '/': {}",
                config.webhook_path
            )));
        }

        let base = BaseChannel::new("line", config.allow_from.clone(), bus);
        Ok(Self {
            inner: Arc::new(LineInner {
                base,
                config,
                client: create_http_client()?,
                media_dir,
                running: AtomicBool::new(false),
                bot: RwLock::new(BotInfo::default()),
                reply_handles: Mutex::new(HashMap::new()),
                quote_tokens: Mutex::new(HashMap::new()),
                server: tokio::sync::Mutex::new(None),
                events: TaskTracker::new(),
            }),
        })
    }

    /// Webhook router, mounted at the configured path
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.inner.config.webhook_path, post(webhook_handler))
            .with_state(Arc::clone(&self.inner))
    }

    /// Address the webhook server is bound to while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.server.lock().await.as_ref().map(|s| s.addr)
    }

    pub fn bot_info(&self) -> BotInfo {
        self.inner.bot.read().clone()
    }

    #[cfg(test)]
    fn set_bot_info(&self, info: BotInfo) {
        *self.inner.bot.write() = info;
    }

    #[cfg(test)]
    fn store_reply_token_at(&self, chat_id: &str, token: &str, issued_at: Instant) {
        self.inner.reply_handles.lock().insert(
            chat_id.to_string(),
            ReplyHandle {
                token: token.to_string(),
                issued_at,
            },
        );
    }

    #[cfg(test)]
    fn has_reply_token(&self, chat_id: &str) -> bool {
        self.inner.reply_handles.lock().contains_key(chat_id)
    }
}

impl LineInner {
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn fetch_bot_info(&self) -> Result<BotInfo> {
        let response = self
            .client
            .get(self.api_url("/v2/bot/info"))
            .bearer_auth(&self.config.channel_access_token)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::ApiError(format!(
                "bot info request failed with status {}",
                response.status()
            )));
        }
        response
            .json::<BotInfo>()
            .await
            .map_err(|e| ChannelError::ApiError(format!("invalid bot info: {}", e)))
    }

    async fn post_api(&self, path: &str, body: Value) -> Result<()> {
        let response = self
            .client
            .post(self.api_url(path))
            .bearer_auth(&self.config.channel_access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(ChannelError::ApiError(format!(
            "{} returned {}: {}",
            path,
            status,
            truncate(&detail, 200)
        )))
    }

    async fn send_loading(&self, chat_id: &str) {
        if chat_id.is_empty() {
            return;
        }
        let body = json!({ "chatId": chat_id, "loadingSeconds": LOADING_SECONDS });
        if let Err(e) = self.post_api("/v2/bot/chat/loading/start", body).await {
            debug!("Failed to send loading indicator: {}", e);
        }
    }

    async fn download_content(&self, message_id: &str, filename: &str) -> Option<PathBuf> {
        let url = format!(
            "{}/v2/bot/message/{}/content",
            self.config.data_api_base.trim_end_matches('/'),
            message_id
        );
        match download_to_temp(
            &self.client,
            &url,
            Some(&self.config.channel_access_token),
            &self.media_dir,
            filename,
        )
        .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(message_id = %message_id, "Failed to download LINE content: {}", e);
                None
            }
        }
    }

    async fn process_event(&self, event: WebhookEvent) {
        if event.kind != "message" {
            debug!(event_type = %event.kind, "Ignoring non-message event");
            return;
        }
        let (Some(source), Some(message)) = (event.source.as_ref(), event.message) else {
            debug!("Ignoring message event without source or message");
            return;
        };

        let (sender_id, chat_id, source_type) = source.resolve();
        if chat_id.is_empty() {
            debug!(source_type, "Ignoring event from unresolvable source");
            return;
        }
        let is_group = matches!(source_type, "group" | "room");

        let text = message.text.clone().unwrap_or_default();
        if is_group {
            let addressed = message.kind == "text"
                && is_bot_mentioned(&self.bot.read(), &text, message.mention.as_ref());
            if !addressed {
                debug!(chat_id = %chat_id, "Ignoring group message without mention");
                return;
            }
        }

        if let Some(token) = event.reply_token.filter(|t| !t.is_empty()) {
            self.reply_handles.lock().insert(
                chat_id.to_string(),
                ReplyHandle {
                    token,
                    issued_at: Instant::now(),
                },
            );
        }

        let mut content = String::new();
        let mut downloaded = Vec::new();
        match message.kind.as_str() {
            "text" => {
                if let Some(quote) = message.quote_token.as_ref().filter(|q| !q.is_empty()) {
                    self.quote_tokens
                        .lock()
                        .insert(chat_id.to_string(), quote.clone());
                }
                content = if is_group {
                    strip_bot_mention(&self.bot.read(), &text, message.mention.as_ref())
                } else {
                    text
                };
            }
            kind @ ("image" | "audio" | "video") => {
                let filename = match kind {
                    "image" => "image.jpg",
                    "audio" => "audio.m4a",
                    _ => "video.mp4",
                };
                if let Some(path) = self.download_content(&message.id, filename).await {
                    downloaded.push(path);
                    content = format!("[{}]", kind);
                }
            }
            "file" => content = "[file]".to_string(),
            "sticker" => content = "[sticker]".to_string(),
            other => content = format!("[{}]", other),
        }

        // Owns the downloads from here on; dropping it removes them
        let temp_files = TempFiles::new(downloaded);

        if content.trim().is_empty() {
            return;
        }

        debug!(
            sender_id = %sender_id,
            chat_id = %chat_id,
            message_type = %message.kind,
            is_group,
            preview = %truncate(&content, 50),
            "Received LINE message"
        );

        // The loading animation needs a user id, not a group id
        self.send_loading(sender_id).await;

        let mut inbound = InboundMessage::new("line", sender_id, chat_id, content)
            .with_metadata("source_type", source_type)
            .with_metadata(meta::MESSAGE_ID, message.id.clone());
        for path in temp_files.paths() {
            inbound = inbound.with_media(path.to_string_lossy().to_string());
        }
        let inbound = inbound.with_temp_files(temp_files);

        match self.base.publish(inbound).await {
            Ok(()) => {}
            Err(ChannelError::AccessDenied(_)) => {}
            Err(e) => error!(chat_id = %chat_id, "Failed to publish LINE message: {}", e),
        }
    }

    async fn reply(&self, token: &str, messages: &Value) -> Result<()> {
        self.post_api(
            "/v2/bot/message/reply",
            json!({ "replyToken": token, "messages": messages }),
        )
        .await
    }

    async fn push(&self, to: &str, messages: &Value) -> Result<()> {
        self.post_api("/v2/bot/message/push", json!({ "to": to, "messages": messages }))
            .await
    }
}

async fn webhook_handler(
    State(inner): State<Arc<LineInner>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&inner.config.channel_secret, &body, signature) {
        warn!("Invalid LINE webhook signature");
        return StatusCode::FORBIDDEN;
    }

    let payload: WebhookBody = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to parse LINE webhook body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    // Acknowledge now; events of one delivery are handled in order
    if !payload.events.is_empty() {
        let worker = Arc::clone(&inner);
        inner.events.spawn(async move {
            for event in payload.events {
                worker.process_event(event).await;
            }
        });
    }
    StatusCode::OK
}

#[async_trait]
impl Channel for LineHandler {
    fn name(&self) -> &str {
        self.inner.base.name()
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let mut server = self.inner.server.lock().await;
        if self.is_running() {
            info!("LINE channel already running");
            return Ok(());
        }

        info!("Starting LINE channel (webhook mode)");
        match self.inner.fetch_bot_info().await {
            Ok(bot) => {
                info!(
                    bot_user_id = %bot.user_id,
                    basic_id = %bot.basic_id,
                    display_name = %bot.display_name,
                    "LINE bot info fetched"
                );
                *self.inner.bot.write() = bot;
            }
            Err(e) => warn!("Failed to fetch LINE bot info (mention detection limited): {}", e),
        }

        let bind_addr = format!(
            "{}:{}",
            self.inner.config.webhook_host, self.inner.config.webhook_port
        );
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("bind {}: {}", bind_addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let shutdown = cancel.child_token();
        let app = self.router();
        let inner = Arc::clone(&self.inner);
        let stop_signal = shutdown.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stop_signal.cancelled_owned())
                .await
            {
                error!("LINE webhook server error: {}", e);
            }
            inner.running.store(false, Ordering::SeqCst);
            info!("LINE webhook server stopped");
        });

        *server = Some(RunningServer {
            shutdown,
            task,
            addr,
        });
        self.inner.running.store(true, Ordering::SeqCst);
        info!(
            addr = %addr,
            path = %self.inner.config.webhook_path,
            "LINE webhook server listening"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("Stopping LINE channel");
        self.inner.running.store(false, Ordering::SeqCst);
        let started = Instant::now();

        let server = self.inner.server.lock().await.take();
        if let Some(server) = server {
            server.shutdown.cancel();
            let mut task = server.task;
            if tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("LINE webhook server did not drain in time, aborting");
                task.abort();
            }
        }

        // Events already acknowledged share the same shutdown budget
        self.inner.events.close();
        let remaining = SERVER_SHUTDOWN_TIMEOUT.saturating_sub(started.elapsed());
        if tokio::time::timeout(remaining, self.inner.events.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.inner.events.len(),
                "LINE events still in flight after shutdown timeout"
            );
        }
        self.inner.events.reopen();

        info!("LINE channel stopped");
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if !self.is_running() {
            return Err(ChannelError::NotRunning("line".to_string()));
        }

        let quote = self.inner.quote_tokens.lock().remove(&message.chat_id);
        let mut text = json!({ "type": "text", "text": message.content });
        if let Some(quote) = &quote {
            text["quoteToken"] = json!(quote);
        }
        let messages = json!([text]);

        // Taken out of the store whether or not the reply works
        let handle = self.inner.reply_handles.lock().remove(&message.chat_id);
        match handle {
            Some(handle) if handle.is_fresh() => {
                match self.inner.reply(&handle.token, &messages).await {
                    Ok(()) => {
                        debug!(
                            chat_id = %message.chat_id,
                            quoted = quote.is_some(),
                            "Message sent via reply API"
                        );
                        return Ok(());
                    }
                    Err(e) => debug!("Reply API failed, falling back to push: {}", e),
                }
            }
            Some(_) => debug!(chat_id = %message.chat_id, "Reply token expired, using push"),
            None => {}
        }

        self.inner.push(&message.chat_id, &messages).await
    }
}
