//! Gateway Manager — orchestrates channel lifecycle and message routing.
//!
//! Responsibilities:
//! - Keep the adapter registry (one adapter per platform, last one wins)
//! - Route every inbound message to the single injected handler
//! - Start/stop channels with per-channel failure isolation
//! - Aggregate status and publish `statusChange` / `message` / `error`
//!   events on the [`EventBus`]
//!
//! The connectivity test lives in [`crate::connectivity`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use imgate_core::bus::{EventBus, GatewayEvent};
use imgate_core::config::{ChannelConfig, GatewaySettings};
use imgate_core::{GatewayStatus, InboundMessage, Platform};

use crate::base::{BoxFuture, ChannelHandlers, ChannelPlugin, ReplyFn};
use crate::error::{GatewayError, Result};

/// The single downstream consumer of inbound messages.
///
/// Receives the message plus a reply function bound to its conversation.
pub type MessageHandler =
    Arc<dyn Fn(InboundMessage, ReplyFn) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;

/// Sent back to the conversation when the handler fails.
pub const HANDLER_FAILURE_REPLY: &str =
    "Sorry, something went wrong while processing your message. Please try again.";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INBOUND_IDLE_THRESHOLD: Duration = Duration::from_secs(120);

/// Wrap an async closure into a [`MessageHandler`].
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(InboundMessage, ReplyFn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |message: InboundMessage, reply: ReplyFn| -> BoxFuture<anyhow::Result<()>> {
            Box::pin(f(message, reply))
        },
    )
}

type Registry = Arc<RwLock<HashMap<Platform, Arc<dyn ChannelPlugin>>>>;
type HandlerSlot = Arc<RwLock<Option<MessageHandler>>>;

/// What the adapter callbacks need: registry, handler, and bus.
#[derive(Clone)]
struct Hub {
    channels: Registry,
    handler: HandlerSlot,
    bus: Arc<EventBus>,
}

impl Hub {
    fn adapters(&self) -> Vec<Arc<dyn ChannelPlugin>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn all_status(&self) -> Vec<GatewayStatus> {
        let mut statuses: Vec<GatewayStatus> = self.adapters().iter().map(|a| a.status()).collect();
        statuses.sort_by_key(|s| s.platform);
        statuses
    }

    fn publish_status(&self) {
        self.bus.publish(GatewayEvent::StatusChange(self.all_status()));
    }

    /// Every error that reaches the gateway is followed by a status snapshot.
    fn report_error(&self, platform: Platform, err: &GatewayError) {
        self.bus.publish(GatewayEvent::Error {
            platform,
            error: err.to_string(),
        });
        self.publish_status();
    }

    async fn route(&self, message: InboundMessage, reply: ReplyFn) {
        self.bus.publish(GatewayEvent::Message(message.clone()));

        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(handler) = handler else {
            warn!(platform = %message.platform, "no message handler set, dropping message");
            return;
        };

        let platform = message.platform;
        let chat_id = message.conversation_id.clone();

        // Own task, so a panicking handler is caught like a failing one.
        let failure = match tokio::spawn(handler(message, reply.clone())).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(e) => format!("handler panicked: {e}"),
        };

        error!(platform = %platform, chat_id = %chat_id, error = %failure, "message handler failed");
        self.report_error(platform, &GatewayError::Handler(failure));

        if let Err(e) = reply(HANDLER_FAILURE_REPLY.to_string()).await {
            debug!(platform = %platform, error = %e, "failure notice not delivered");
        }
    }
}

// ─────────────────────────────────────────────
// GatewayManager
// ─────────────────────────────────────────────

/// Manages the lifecycle, routing, and status of all chat channels.
///
/// Adapters are registered with `register_channel()` and stay registered
/// for the manager's lifetime. Inbound messages from every adapter flow to
/// the handler set with `set_message_handler()`.
pub struct GatewayManager {
    hub: Hub,
    pub(crate) probe_timeout: Duration,
    pub(crate) inbound_idle_threshold: Duration,
}

impl GatewayManager {
    /// Create a manager publishing to `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            hub: Hub {
                channels: Arc::new(RwLock::new(HashMap::new())),
                handler: Arc::new(RwLock::new(None)),
                bus,
            },
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            inbound_idle_threshold: DEFAULT_INBOUND_IDLE_THRESHOLD,
        }
    }

    /// Apply the diagnostics tunables from the config file.
    pub fn with_settings(mut self, settings: &GatewaySettings) -> Self {
        self.probe_timeout = Duration::from_secs(settings.probe_timeout_secs.max(1));
        self.inbound_idle_threshold = Duration::from_secs(settings.inbound_idle_warn_secs);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.hub.bus.subscribe()
    }

    /// Register an adapter. Replaces any adapter already registered for the
    /// same platform.
    pub fn register_channel(&self, adapter: Arc<dyn ChannelPlugin>) {
        let platform = adapter.platform();
        let previous = self
            .hub
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(platform, adapter);
        if previous.is_some() {
            warn!(platform = %platform, "replaced previously registered channel");
        } else {
            info!(platform = %platform, "registered channel");
        }
    }

    pub fn get_channel(&self, platform: Platform) -> Option<Arc<dyn ChannelPlugin>> {
        self.hub
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&platform)
            .cloned()
    }

    /// Registered platforms, sorted.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self
            .hub
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        platforms.sort();
        platforms
    }

    /// Install the message handler, replacing any previous one.
    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self
            .hub
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn handlers_for(&self) -> ChannelHandlers {
        let on_message = {
            let hub = self.hub.clone();
            Arc::new(move |message: InboundMessage, reply: ReplyFn| -> BoxFuture<()> {
                let hub = hub.clone();
                Box::pin(async move { hub.route(message, reply).await })
            })
        };
        let on_status_change = {
            let hub = self.hub.clone();
            Arc::new(move |_status: GatewayStatus| hub.publish_status())
        };
        let on_error = {
            let hub = self.hub.clone();
            Arc::new(move |platform: Platform, err: GatewayError| {
                warn!(platform = %platform, error = %err, "channel reported an error");
                hub.report_error(platform, &err);
            })
        };

        ChannelHandlers {
            on_message,
            on_status_change,
            on_error,
        }
    }

    /// Validate `config` and start the platform's adapter.
    pub async fn start_channel(&self, platform: Platform, config: &ChannelConfig) -> Result<()> {
        let Some(adapter) = self.get_channel(platform) else {
            let err = GatewayError::NotRegistered(platform);
            self.hub.report_error(platform, &err);
            return Err(err);
        };

        let config = match adapter.validate_config(config) {
            Ok(config) => config,
            Err(e) => {
                warn!(platform = %platform, error = %e, "rejected channel config");
                self.hub.report_error(platform, &e);
                return Err(e);
            }
        };

        info!(platform = %platform, "starting channel");
        let result = adapter.start(&config, self.handlers_for()).await;
        if let Err(e) = &result {
            error!(platform = %platform, error = %e, "channel start failed");
        }
        self.hub.publish_status();
        result
    }

    /// Stop one channel. Teardown errors are logged, never returned.
    pub async fn stop_channel(&self, platform: Platform) {
        let Some(adapter) = self.get_channel(platform) else {
            debug!(platform = %platform, "stop requested for unregistered channel");
            return;
        };
        if let Err(e) = adapter.stop().await {
            error!(platform = %platform, error = %e, "channel stop failed");
        }
        self.hub.publish_status();
    }

    /// Start every enabled channel in `configs`. One channel failing does
    /// not keep the others from starting.
    ///
    /// Returns the number of channels that started.
    pub async fn start_all_enabled(&self, configs: &BTreeMap<Platform, ChannelConfig>) -> usize {
        let mut started = 0;
        for (platform, config) in configs {
            if !config.enabled {
                debug!(platform = %platform, "channel disabled, skipping");
                continue;
            }
            match self.start_channel(*platform, config).await {
                Ok(()) => started += 1,
                Err(e) => error!(platform = %platform, error = %e, "channel failed to start"),
            }
        }
        info!(started, "channels started");
        started
    }

    /// Stop every registered channel concurrently. Always completes; each
    /// failure is logged on its own.
    pub async fn stop_all(&self) {
        let adapters = self.hub.adapters();
        info!(count = adapters.len(), "stopping all channels");

        let stops = adapters.into_iter().map(|adapter| {
            let platform = adapter.platform();
            let handle = tokio::spawn(async move { adapter.stop().await });
            async move { (platform, handle.await) }
        });

        for (platform, outcome) in join_all(stops).await {
            match outcome {
                Ok(Ok(())) => debug!(platform = %platform, "channel stopped"),
                Ok(Err(e)) => error!(platform = %platform, error = %e, "channel stop failed"),
                Err(e) => error!(platform = %platform, error = %e, "channel stop panicked"),
            }
        }

        self.hub.publish_status();
        info!("all channels stopped");
    }

    pub fn get_channel_status(&self, platform: Platform) -> Option<GatewayStatus> {
        self.get_channel(platform).map(|adapter| adapter.status())
    }

    /// Status of every registered channel, sorted by platform.
    pub fn get_all_status(&self) -> Vec<GatewayStatus> {
        self.hub.all_status()
    }

    pub fn is_any_connected(&self) -> bool {
        self.hub.adapters().iter().any(|a| a.status().connected)
    }

    pub fn is_connected(&self, platform: Platform) -> bool {
        self.get_channel_status(platform)
            .is_some_and(|status| status.connected)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
