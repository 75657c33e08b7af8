//! Telegram channel — long polling against the Bot API via `teloxide`.
//!
//! Features:
//! - Lazy transport: no bot client exists until `start()` or `probe()`
//! - Restart-safe `start()` and idempotent `stop()`
//! - Poll loop with exponential backoff (1s doubling, capped at 30s)
//! - Group mention gating, with the `@bot` mention stripped from content
//! - Replies over 4000 chars split into ordered chunks
//! - HTML parse mode with plain-text fallback per chunk

pub mod bot_api;
pub mod transport;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::types::{ChatId, Message, ParseMode, UpdateKind, User};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use imgate_core::config::ChannelConfig;
use imgate_core::{ChatType, GatewayStatus, InboundMessage, Platform, ProbeResult};

use crate::base::{reply_fn, ChannelHandlers, ChannelPlugin, ReplyFn};
use crate::error::{GatewayError, Result};
use crate::formatting::{markdown_to_telegram_html, split_message};
use crate::policy::{check_policy, mentions_handle, normalize_id_list, strip_mention};

pub use bot_api::{BotApiClient, BotApiFactory};
pub use transport::{TelegramTransport, TransportFactory};

use transport::display_name;

/// Longest reply sent as a single message. Telegram's hard limit is 4096;
/// the margin absorbs HTML markup added by formatting.
pub const TELEGRAM_SAFE_LEN: usize = 4000;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How long `stop()` waits for the poll loop before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle phase of the adapter's connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Starting,
    Connected,
    Error,
}

/// A live connection: the transport plus the poll loop driving it.
struct Connection {
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<()>,
}

/// State shared between the adapter and its spawned tasks.
struct Shared {
    status: Mutex<GatewayStatus>,
    phase: Mutex<ConnectionPhase>,
    handlers: RwLock<Option<ChannelHandlers>>,
}

impl Shared {
    fn status(&self) -> GatewayStatus {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the whole status record at once.
    fn set_status(&self, status: GatewayStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn update_status(&self, f: impl FnOnce(&mut GatewayStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    fn phase(&self) -> ConnectionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn handlers(&self) -> Option<ChannelHandlers> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_handlers(&self, handlers: Option<ChannelHandlers>) -> Option<ChannelHandlers> {
        let mut slot = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, handlers)
    }

    /// Record a runtime transport error and tell the gateway about it.
    fn report_error(&self, err: GatewayError) {
        self.update_status(|s| s.error = Some(err.to_string()));
        if let Some(handlers) = self.handlers() {
            (handlers.on_error)(Platform::Telegram, err);
        }
    }

    /// Send a reply, splitting over-long content and falling back to plain
    /// text per chunk. Stops at the first chunk that fails both ways.
    async fn send_reply(
        &self,
        transport: &dyn TelegramTransport,
        chat_id: ChatId,
        content: &str,
    ) -> Result<()> {
        if content.trim().is_empty() {
            debug!(chat_id = chat_id.0, "skipping empty reply");
            return Ok(());
        }

        let chunks = if content.chars().count() <= TELEGRAM_SAFE_LEN {
            vec![content.to_string()]
        } else {
            split_message(content, TELEGRAM_SAFE_LEN)
        };
        let total = chunks.len();

        for (idx, chunk) in chunks.iter().enumerate() {
            if let Err(e) = send_chunk(transport, chat_id, chunk).await {
                error!(chat_id = chat_id.0, part = idx + 1, total, error = %e, "telegram reply failed");
                return Err(e);
            }
            self.update_status(|s| s.last_outbound_at = Some(Utc::now()));
        }

        debug!(chat_id = chat_id.0, parts = total, "telegram reply sent");
        Ok(())
    }
}

async fn send_chunk(transport: &dyn TelegramTransport, chat_id: ChatId, chunk: &str) -> Result<()> {
    let html = markdown_to_telegram_html(chunk);
    match transport.send_message(chat_id, &html, Some(ParseMode::Html)).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "HTML send failed, retrying as plain text");
            transport
                .send_message(chat_id, chunk, None)
                .await
                .map_err(|e| GatewayError::Delivery(e.to_string()))
        }
    }
}

/// Telegram adapter implementing [`ChannelPlugin`].
pub struct TelegramAdapter {
    factory: Arc<dyn TransportFactory>,
    shared: Arc<Shared>,
    /// Held for the whole of `start()`/`stop()` so transitions never interleave.
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl TelegramAdapter {
    /// Adapter backed by a `teloxide` bot.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(BotApiFactory))
    }

    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            shared: Arc::new(Shared {
                status: Mutex::new(GatewayStatus::idle(Platform::Telegram)),
                phase: Mutex::new(ConnectionPhase::Idle),
                handlers: RwLock::new(None),
            }),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.shared.phase()
    }

    /// Build a transport, confirm identity, and spawn the poll loop.
    async fn connect(&self, config: &ChannelConfig) -> Result<(Connection, User)> {
        let transport = self.factory.connect(config)?;
        let me = transport.get_me().await?;
        let handle = me.username.clone().unwrap_or_default();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let poller = tokio::spawn(poll_loop(
            self.shared.clone(),
            transport,
            Arc::new(config.clone()),
            handle,
            shutdown_rx,
        ));

        Ok((Connection { shutdown, poller }, me))
    }

    /// Tear down the live connection, if any. The caller holds the lock.
    async fn teardown(&self, slot: &mut Option<Connection>) {
        let Some(connection) = slot.take() else {
            debug!("telegram channel not running, nothing to stop");
            return;
        };

        info!("stopping telegram channel");
        let _ = connection.shutdown.send(true);
        let mut poller = connection.poller;
        match tokio::time::timeout(STOP_GRACE, &mut poller).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "telegram poll loop ended abnormally"),
            Err(_) => {
                warn!("telegram poll loop did not stop in time, aborting");
                poller.abort();
            }
        }

        let previous = self.shared.status();
        let status = GatewayStatus {
            enabled: previous.enabled,
            bot_name: previous.bot_name,
            ..GatewayStatus::idle(Platform::Telegram)
        };
        self.shared.set_status(status.clone());
        self.shared.set_phase(ConnectionPhase::Idle);

        if let Some(handlers) = self.shared.set_handlers(None) {
            (handlers.on_status_change)(status);
        }
    }
}

impl Default for TelegramAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelPlugin for TelegramAdapter {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    fn validate_config(&self, raw: &ChannelConfig) -> Result<ChannelConfig> {
        let token = raw.bot_token.trim();
        if token.is_empty() {
            return Err(GatewayError::ConfigInvalid(
                "Telegram bot token is required".into(),
            ));
        }
        if !token.contains(':') {
            return Err(GatewayError::ConfigInvalid(
                "Telegram bot token looks malformed (expected <bot id>:<secret>)".into(),
            ));
        }

        let mut config = raw.clone();
        config.bot_token = token.to_string();
        config.allow_from = normalize_id_list(&raw.allow_from);
        config.group_allow_from = normalize_id_list(&raw.group_allow_from);
        config.poll_timeout_secs = raw.poll_timeout_secs.clamp(1, 50);
        config.api_base = raw
            .api_base
            .as_deref()
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty());
        Ok(config)
    }

    async fn start(&self, config: &ChannelConfig, handlers: ChannelHandlers) -> Result<()> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            info!("telegram channel already running, restarting");
            self.teardown(&mut slot).await;
        }

        if !config.enabled {
            info!("telegram channel disabled, not starting");
            return Ok(());
        }
        if config.bot_token.trim().is_empty() {
            return Err(GatewayError::ConfigInvalid(
                "Telegram bot token is required".into(),
            ));
        }

        info!("starting telegram channel (long polling)");
        self.shared.set_phase(ConnectionPhase::Starting);
        self.shared.set_handlers(Some(handlers.clone()));

        match self.connect(config).await {
            Ok((connection, me)) => {
                let status = GatewayStatus {
                    connected: true,
                    enabled: true,
                    bot_name: Some(bot_display_name(&me)),
                    started_at: Some(Utc::now()),
                    ..GatewayStatus::idle(Platform::Telegram)
                };
                self.shared.set_status(status.clone());
                self.shared.set_phase(ConnectionPhase::Connected);
                *slot = Some(connection);

                info!(bot = ?status.bot_name, "telegram bot connected, polling for updates");
                (handlers.on_status_change)(status);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "telegram channel failed to start");
                let status = GatewayStatus {
                    enabled: true,
                    error: Some(e.to_string()),
                    bot_name: self.shared.status().bot_name,
                    ..GatewayStatus::idle(Platform::Telegram)
                };
                self.shared.set_status(status);
                self.shared.set_phase(ConnectionPhase::Error);
                self.shared.set_handlers(None);

                (handlers.on_error)(Platform::Telegram, e.clone());
                Err(e)
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        self.teardown(&mut slot).await;
        Ok(())
    }

    async fn probe(&self, config: &ChannelConfig) -> ProbeResult {
        if config.bot_token.trim().is_empty() {
            return ProbeResult::failure("Telegram bot token is required");
        }
        let transport = match self.factory.connect(config) {
            Ok(t) => t,
            Err(e) => return ProbeResult::failure(e.to_string()),
        };
        match transport.get_me().await {
            Ok(me) => ProbeResult::success(bot_display_name(&me)),
            Err(e) => ProbeResult::failure(e.to_string()),
        }
    }

    fn status(&self) -> GatewayStatus {
        self.shared.status()
    }
}

/// `@handle` when the bot has one, else its first name.
fn bot_display_name(me: &User) -> String {
    match me.username.as_deref() {
        Some(handle) if !handle.is_empty() => format!("@{handle}"),
        _ => display_name(me),
    }
}

// ─────────────────────────────────────────────
// Poll loop
// ─────────────────────────────────────────────

async fn poll_loop(
    shared: Arc<Shared>,
    transport: Arc<dyn TelegramTransport>,
    config: Arc<ChannelConfig>,
    bot_handle: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut offset: i32 = 0;
    let mut backoff = BACKOFF_BASE;

    loop {
        let fetched = tokio::select! {
            result = transport.get_updates(offset, config.poll_timeout_secs) => result,
            _ = shutdown.changed() => break,
        };

        match fetched {
            Ok(updates) => {
                backoff = BACKOFF_BASE;
                for update in updates {
                    offset = offset.max(update.id.as_offset());
                    if let UpdateKind::Message(message) = update.kind {
                        dispatch(&shared, &transport, &config, &bot_handle, &message);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?backoff, "telegram polling error");
                shared.report_error(e);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        }
    }

    debug!("telegram poll loop exited");
}

/// Normalize one message and hand it to the gateway on its own task, so a
/// slow handler never stalls polling.
fn dispatch(
    shared: &Arc<Shared>,
    transport: &Arc<dyn TelegramTransport>,
    config: &ChannelConfig,
    bot_handle: &str,
    message: &Message,
) {
    shared.update_status(|s| s.last_inbound_at = Some(Utc::now()));

    let inbound = match normalize_message(config, bot_handle, message) {
        Ok(inbound) => inbound,
        Err(reason) => {
            debug!(reason = %reason, "dropping telegram message");
            return;
        }
    };
    let Some(handlers) = shared.handlers() else {
        return;
    };

    debug!(
        chat_id = %inbound.conversation_id,
        sender = %inbound.sender_id,
        chars = inbound.content.len(),
        "telegram message received"
    );

    let reply = reply_to(shared.clone(), transport.clone(), message.chat.id);
    tokio::spawn(async move {
        (handlers.on_message)(inbound, reply).await;
    });
}

fn reply_to(shared: Arc<Shared>, transport: Arc<dyn TelegramTransport>, chat_id: ChatId) -> ReplyFn {
    reply_fn(move |text: String| {
        let shared = shared.clone();
        let transport = transport.clone();
        async move { shared.send_reply(transport.as_ref(), chat_id, &text).await }
    })
}

/// Turn a raw Telegram message into an [`InboundMessage`], or the reason it
/// is dropped.
pub(crate) fn normalize_message(
    config: &ChannelConfig,
    bot_handle: &str,
    message: &Message,
) -> std::result::Result<InboundMessage, String> {
    let Some(from) = message.from.as_ref() else {
        return Err("message has no sender".into());
    };
    if from.is_bot {
        return Err("message from a bot".into());
    }

    let chat_type = if message.chat.is_private() {
        ChatType::Direct
    } else {
        ChatType::Group
    };

    let Some(text) = message
        .text()
        .or_else(|| message.caption())
        .filter(|t| !t.trim().is_empty())
    else {
        return Err("message has no text".into());
    };

    let conversation_id = message.chat.id.0.to_string();
    let sender_id = from.id.0.to_string();

    if let Some(reason) = check_policy(config, chat_type, &conversation_id, &sender_id) {
        return Err(reason);
    }

    let content = match chat_type {
        ChatType::Direct => text.trim().to_string(),
        ChatType::Group => {
            if config.require_mention && !mentions_handle(text, bot_handle) {
                return Err("bot not mentioned in group".into());
            }
            let stripped = strip_mention(text, bot_handle);
            if stripped.is_empty() {
                return Err("message is empty after removing the mention".into());
            }
            stripped
        }
    };

    Ok(InboundMessage {
        platform: Platform::Telegram,
        message_id: message.id.0.to_string(),
        conversation_id,
        sender_id,
        sender_name: display_name(from),
        content,
        chat_type,
        timestamp: message.date,
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::transport::fixtures;
    use super::*;
    use imgate_core::config::{DmPolicy, GroupPolicy};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use teloxide::types::Update;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    // ── Fakes ──

    #[derive(Default)]
    struct FakeTransport {
        me_fails: bool,
        batches: Mutex<VecDeque<Result<Vec<Update>>>>,
        sent: Mutex<Vec<(i64, String, Option<ParseMode>)>>,
        reject_html: AtomicBool,
        reject_all: AtomicBool,
        polls: AtomicUsize,
        /// Offset and clock reading of every `get_updates` call.
        calls: Mutex<Vec<(i32, Instant)>>,
    }

    impl FakeTransport {
        fn queue(&self, batch: Result<Vec<Update>>) {
            self.batches.lock().unwrap().push_back(batch);
        }

        fn sent(&self) -> Vec<(i64, String, Option<ParseMode>)> {
            self.sent.lock().unwrap().clone()
        }

        fn calls(&self) -> Vec<(i32, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TelegramTransport for FakeTransport {
        async fn get_me(&self) -> Result<User> {
            if self.me_fails {
                return Err(GatewayError::AuthFailed("Unauthorized".into()));
            }
            Ok(fixtures::user(json!({
                "id": 1,
                "is_bot": true,
                "first_name": "Gate",
                "username": "gate_bot"
            })))
        }

        async fn get_updates(&self, offset: i32, _timeout_secs: u32) -> Result<Vec<Update>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push((offset, Instant::now()));
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => batch,
                None => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn send_message(&self, chat_id: ChatId, text: &str, parse_mode: Option<ParseMode>) -> Result<()> {
            if self.reject_all.load(Ordering::SeqCst)
                || (parse_mode.is_some() && self.reject_html.load(Ordering::SeqCst))
            {
                return Err(GatewayError::Connection("Bad Request".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.0, text.to_string(), parse_mode));
            Ok(())
        }
    }

    struct FakeFactory {
        transport: Arc<FakeTransport>,
        connects: AtomicUsize,
    }

    impl TransportFactory for FakeFactory {
        fn connect(&self, _config: &ChannelConfig) -> Result<Arc<dyn TelegramTransport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.transport.clone())
        }
    }

    fn adapter_with(transport: FakeTransport) -> (TelegramAdapter, Arc<FakeFactory>, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        let factory = Arc::new(FakeFactory {
            transport: transport.clone(),
            connects: AtomicUsize::new(0),
        });
        (TelegramAdapter::with_factory(factory.clone()), factory, transport)
    }

    fn enabled_config() -> ChannelConfig {
        ChannelConfig {
            enabled: true,
            bot_token: "123:abc".into(),
            ..Default::default()
        }
    }

    /// Handlers that record status transitions and errors.
    fn recording_handlers() -> (ChannelHandlers, Arc<Mutex<Vec<GatewayStatus>>>, Arc<Mutex<Vec<GatewayError>>>) {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let (s, e) = (statuses.clone(), errors.clone());
        let handlers = ChannelHandlers {
            on_status_change: Arc::new(move |status| s.lock().unwrap().push(status)),
            on_error: Arc::new(move |_, err| e.lock().unwrap().push(err)),
            ..ChannelHandlers::noop()
        };
        (handlers, statuses, errors)
    }

    fn message(chat_kind: &str, chat_id: i64, text: Option<&str>) -> Message {
        fixtures::message(chat_kind, chat_id, text)
    }

    fn connection_error() -> Result<Vec<Update>> {
        Err(GatewayError::Connection("network down".into()))
    }

    /// Gaps between consecutive `get_updates` calls, in whole seconds.
    fn gaps(calls: &[(i32, Instant)]) -> Vec<u64> {
        calls.windows(2).map(|w| (w[1].1 - w[0].1).as_secs()).collect()
    }

    // ── Config validation ──

    #[test]
    fn test_validate_requires_token() {
        let (adapter, _, _) = adapter_with(FakeTransport::default());
        let err = adapter.validate_config(&ChannelConfig::default()).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid(_)));

        let bad = ChannelConfig {
            bot_token: "not-a-token".into(),
            ..Default::default()
        };
        assert!(adapter.validate_config(&bad).is_err());
    }

    #[test]
    fn test_validate_normalizes() {
        let (adapter, _, _) = adapter_with(FakeTransport::default());
        let raw = ChannelConfig {
            bot_token: "  123:abc ".into(),
            allow_from: vec![" 42".into(), "42".into(), "".into()],
            poll_timeout_secs: 500,
            api_base: Some("http://localhost:8081/".into()),
            ..Default::default()
        };
        let config = adapter.validate_config(&raw).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.allow_from, vec!["42"]);
        assert_eq!(config.poll_timeout_secs, 50);
        assert_eq!(config.api_base.as_deref(), Some("http://localhost:8081"));
    }

    // ── Lifecycle ──

    #[tokio::test]
    async fn test_stop_when_never_started_is_noop() {
        let (adapter, _, _) = adapter_with(FakeTransport::default());
        adapter.stop().await.unwrap();
        adapter.stop().await.unwrap();
        assert_eq!(adapter.phase(), ConnectionPhase::Idle);
        assert!(!adapter.status().connected);
    }

    #[tokio::test]
    async fn test_start_disabled_does_not_connect() {
        let (adapter, factory, _) = adapter_with(FakeTransport::default());
        let config = ChannelConfig {
            enabled: false,
            ..enabled_config()
        };
        adapter.start(&config, ChannelHandlers::noop()).await.unwrap();
        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
        assert_eq!(adapter.phase(), ConnectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_start_missing_token_fails_before_connecting() {
        let (adapter, factory, _) = adapter_with(FakeTransport::default());
        let (handlers, statuses, _) = recording_handlers();
        let config = ChannelConfig {
            bot_token: String::new(),
            ..enabled_config()
        };

        let err = adapter.start(&config, handlers).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid(_)));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
        assert!(statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_connects_and_reports_status() {
        let (adapter, _, _) = adapter_with(FakeTransport::default());
        let (handlers, statuses, _) = recording_handlers();

        adapter.start(&enabled_config(), handlers).await.unwrap();

        let status = adapter.status();
        assert!(status.connected);
        assert!(status.enabled);
        assert!(status.error.is_none());
        assert_eq!(status.bot_name.as_deref(), Some("@gate_bot"));
        assert!(status.started_at.is_some());
        assert_eq!(adapter.phase(), ConnectionPhase::Connected);
        assert_eq!(*statuses.lock().unwrap(), vec![status]);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_identity_failure_unwinds() {
        let (adapter, _, _) = adapter_with(FakeTransport {
            me_fails: true,
            ..Default::default()
        });
        let (handlers, statuses, errors) = recording_handlers();

        let err = adapter.start(&enabled_config(), handlers).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthFailed(_)));

        let status = adapter.status();
        assert!(!status.connected);
        assert!(status.error.as_deref().is_some_and(|e| e.contains("Unauthorized")));
        assert_eq!(adapter.phase(), ConnectionPhase::Error);
        assert!(statuses.lock().unwrap().is_empty());
        assert_eq!(errors.lock().unwrap().len(), 1);

        // Nothing left running: stop is a silent no-op.
        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_stops_previous_connection_first() {
        let (adapter, factory, _) = adapter_with(FakeTransport::default());
        let (handlers, statuses, _) = recording_handlers();

        adapter.start(&enabled_config(), handlers.clone()).await.unwrap();
        adapter.start(&enabled_config(), handlers).await.unwrap();

        assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
        let connected: Vec<bool> = statuses.lock().unwrap().iter().map(|s| s.connected).collect();
        assert_eq!(connected, vec![true, false, true]);
        assert!(adapter.status().connected);

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_keeps_bot_name() {
        let (adapter, _, transport) = adapter_with(FakeTransport::default());
        let (handlers, statuses, _) = recording_handlers();
        adapter.start(&enabled_config(), handlers).await.unwrap();

        adapter.stop().await.unwrap();
        let status = adapter.status();
        assert!(!status.connected);
        assert!(status.started_at.is_none());
        assert_eq!(status.bot_name.as_deref(), Some("@gate_bot"));
        assert_eq!(statuses.lock().unwrap().len(), 2);

        // Poll loop is gone.
        let polls = transport.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.polls.load(Ordering::SeqCst), polls);
    }

    #[tokio::test]
    async fn test_polling_error_is_recorded() {
        let transport = FakeTransport::default();
        transport.queue(connection_error());
        let (adapter, _, _) = adapter_with(transport);
        let (handlers, _, errors) = recording_handlers();

        adapter.start(&enabled_config(), handlers).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(errors.lock().unwrap().len(), 1);
        let status = adapter.status();
        assert!(status.connected);
        assert!(status.error.as_deref().is_some_and(|e| e.contains("network down")));

        adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_does_not_touch_state() {
        let (adapter, factory, _) = adapter_with(FakeTransport::default());
        let result = adapter.probe(&enabled_config()).await;
        assert!(result.ok);
        assert_eq!(result.bot_name.as_deref(), Some("@gate_bot"));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.status(), GatewayStatus::idle(Platform::Telegram));
        assert_eq!(adapter.phase(), ConnectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_probe_reports_failure() {
        let (adapter, _, _) = adapter_with(FakeTransport {
            me_fails: true,
            ..Default::default()
        });
        let result = adapter.probe(&enabled_config()).await;
        assert!(!result.ok);
        assert!(result.error.is_some_and(|e| e.contains("Unauthorized")));

        let no_token = adapter.probe(&ChannelConfig::default()).await;
        assert!(!no_token.ok);
    }

    // ── Inbound → handler → reply ──

    #[tokio::test]
    async fn test_inbound_message_reaches_handler_and_reply_is_sent() {
        let transport = FakeTransport::default();
        transport.queue(Ok(vec![fixtures::update(
            7,
            fixtures::message_json("private", 42, Some("hello")),
        )]));
        let (adapter, _, transport) = adapter_with(transport);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = ChannelHandlers {
            on_message: Arc::new(move |msg: InboundMessage, reply: ReplyFn| {
                let tx = tx.clone();
                Box::pin(async move {
                    let result = reply(format!("echo: **{}**", msg.content)).await;
                    let _ = tx.send((msg, result.is_ok()));
                })
            }),
            ..ChannelHandlers::noop()
        };

        adapter.start(&enabled_config(), handlers).await.unwrap();
        let (msg, replied) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(msg.content, "hello");
        assert_eq!(msg.chat_type, ChatType::Direct);
        assert_eq!(msg.sender_name, "Ada Lovelace");
        assert!(replied);
        assert_eq!(
            transport.sent(),
            vec![(42, "echo: <b>hello</b>".to_string(), Some(ParseMode::Html))]
        );

        let status = adapter.status();
        assert!(status.last_inbound_at.is_some());
        assert!(status.last_outbound_at.is_some());

        adapter.stop().await.unwrap();
    }

    // ── Poll loop ──

    #[tokio::test(start_paused = true)]
    async fn test_offset_advances_past_each_update() {
        let transport = FakeTransport::default();
        let edited: Update = serde_json::from_value(json!({
            "update_id": 12,
            "edited_message": fixtures::message_json("private", 42, Some("edited"))
        }))
        .unwrap();
        transport.queue(Ok(vec![
            fixtures::update(9, fixtures::message_json("private", 42, Some("one"))),
            fixtures::update(7, fixtures::message_json("private", 42, Some("late"))),
        ]));
        transport.queue(Ok(vec![edited]));
        let (adapter, _, transport) = adapter_with(transport);

        adapter.start(&enabled_config(), ChannelHandlers::noop()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        adapter.stop().await.unwrap();

        let offsets: Vec<i32> = transport.calls().iter().take(4).map(|(o, _)| *o).collect();
        // A late lower id never moves the offset back; non-message updates
        // are acknowledged too.
        assert_eq!(offsets, vec![0, 10, 13, 13]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_and_resets_after_success() {
        let transport = FakeTransport::default();
        for _ in 0..3 {
            transport.queue(connection_error());
        }
        transport.queue(Ok(vec![fixtures::update(
            7,
            fixtures::message_json("private", 42, Some("hello")),
        )]));
        transport.queue(connection_error());
        let (adapter, _, transport) = adapter_with(transport);

        adapter.start(&enabled_config(), ChannelHandlers::noop()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        adapter.stop().await.unwrap();

        let calls = transport.calls();
        assert!(calls.len() >= 6);
        let offsets: Vec<i32> = calls[..6].iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 0, 0, 0, 8, 8]);
        assert_eq!(gaps(&calls[..6]), vec![1, 2, 4, 0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_caps_at_thirty_seconds() {
        let transport = FakeTransport::default();
        for _ in 0..7 {
            transport.queue(connection_error());
        }
        let (adapter, _, transport) = adapter_with(transport);
        let (handlers, _, errors) = recording_handlers();

        adapter.start(&enabled_config(), handlers).await.unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        adapter.stop().await.unwrap();

        let calls = transport.calls();
        assert!(calls.len() >= 8);
        assert_eq!(gaps(&calls[..8]), vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(errors.lock().unwrap().len(), 7);
    }

    // ── Normalization ──

    #[test]
    fn test_normalize_direct_message() {
        let msg = normalize_message(&enabled_config(), "gate_bot", &message("private", 42, Some(" hi ")))
            .unwrap();
        assert_eq!(msg.platform, Platform::Telegram);
        assert_eq!(msg.conversation_id, "42");
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.message_id, "5");
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_normalize_drops_bots_and_empty() {
        let config = enabled_config();
        let mut from_bot = fixtures::message_json("private", 42, Some("hi"));
        from_bot["from"]["is_bot"] = json!(true);
        let from_bot: Message = serde_json::from_value(from_bot).unwrap();
        assert!(normalize_message(&config, "gate_bot", &from_bot).is_err());
        assert!(normalize_message(&config, "gate_bot", &message("private", 42, None)).is_err());
        assert!(normalize_message(&config, "gate_bot", &message("private", 42, Some("  "))).is_err());
    }

    #[test]
    fn test_normalize_uses_caption() {
        let mut msg = fixtures::message_json("private", 42, None);
        msg["caption"] = json!("photo caption");
        let msg: Message = serde_json::from_value(msg).unwrap();
        let inbound = normalize_message(&enabled_config(), "gate_bot", &msg).unwrap();
        assert_eq!(inbound.content, "photo caption");
    }

    #[test]
    fn test_group_requires_mention() {
        let config = enabled_config();
        let unmentioned = message("supergroup", -100, Some("hello all"));
        assert!(normalize_message(&config, "gate_bot", &unmentioned).is_err());

        let mentioned = message("group", -100, Some("@Gate_Bot what's up"));
        let inbound = normalize_message(&config, "gate_bot", &mentioned).unwrap();
        assert_eq!(inbound.chat_type, ChatType::Group);
        assert_eq!(inbound.conversation_id, "-100");
        assert_eq!(inbound.content, "what's up");

        let bare = message("group", -100, Some("@gate_bot"));
        assert!(normalize_message(&config, "gate_bot", &bare).is_err());
    }

    #[test]
    fn test_group_without_mention_requirement() {
        let config = ChannelConfig {
            require_mention: false,
            ..enabled_config()
        };
        let inbound =
            normalize_message(&config, "gate_bot", &message("group", -100, Some("hello all"))).unwrap();
        assert_eq!(inbound.content, "hello all");
    }

    #[test]
    fn test_policy_applied() {
        let dm_locked = ChannelConfig {
            dm_policy: DmPolicy::Allowlist,
            allow_from: vec!["7".into()],
            ..enabled_config()
        };
        assert!(normalize_message(&dm_locked, "gate_bot", &message("private", 42, Some("hi"))).is_err());

        let groups_off = ChannelConfig {
            group_policy: GroupPolicy::Disabled,
            ..enabled_config()
        };
        let msg = message("group", -100, Some("@gate_bot hi"));
        assert!(normalize_message(&groups_off, "gate_bot", &msg).is_err());
    }

    // ── Outbound ──

    fn shared() -> Shared {
        Shared {
            status: Mutex::new(GatewayStatus::idle(Platform::Telegram)),
            phase: Mutex::new(ConnectionPhase::Idle),
            handlers: RwLock::new(None),
        }
    }

    #[tokio::test]
    async fn test_long_reply_is_split_in_order() {
        let transport = FakeTransport::default();
        let text = format!("{}\n{}", "a".repeat(3000), "b".repeat(3000));

        shared().send_reply(&transport, ChatId(42), &text).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "a".repeat(3000));
        assert_eq!(sent[1].1, "b".repeat(3000));
    }

    #[tokio::test]
    async fn test_html_rejection_falls_back_to_plain() {
        let transport = FakeTransport::default();
        transport.reject_html.store(true, Ordering::SeqCst);

        let shared = shared();
        shared.send_reply(&transport, ChatId(42), "**bold**").await.unwrap();

        assert_eq!(transport.sent(), vec![(42, "**bold**".to_string(), None)]);
        assert!(shared.status().last_outbound_at.is_some());
    }

    #[tokio::test]
    async fn test_total_send_failure_is_delivery_error() {
        let transport = FakeTransport::default();
        transport.reject_all.store(true, Ordering::SeqCst);

        let shared = shared();
        let err = shared.send_reply(&transport, ChatId(42), "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::Delivery(_)));
        assert!(shared.status().last_outbound_at.is_none());
    }

    #[tokio::test]
    async fn test_empty_reply_is_skipped() {
        let transport = FakeTransport::default();
        shared().send_reply(&transport, ChatId(42), "   ").await.unwrap();
        assert!(transport.sent().is_empty());
    }
}
