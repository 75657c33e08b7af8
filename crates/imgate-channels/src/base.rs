//! Channel plugin contract — the interface every platform adapter implements.
//!
//! Each adapter (Telegram, Feishu, etc.) implements [`ChannelPlugin`] to:
//! - `validate_config()` — normalize a raw config, rejecting it before any I/O
//! - `start()` — establish the platform connection (restarting if running)
//! - `stop()` — idempotent teardown
//! - `probe()` — connection-independent identity/auth check
//! - `status()` — snapshot of the channel's [`GatewayStatus`]
//!
//! Adapters report back to the gateway through a [`ChannelHandlers`] bundle
//! handed to them on `start()`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use imgate_core::config::ChannelConfig;
use imgate_core::{GatewayStatus, InboundMessage, Platform, ProbeResult};

use crate::error::{GatewayError, Result};

/// Boxed, sendable future used by the callback types below.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Delivers outbound text to the conversation one inbound message came from.
///
/// May be called several times for one inbound message (multi-part replies).
pub type ReplyFn = Arc<dyn Fn(String) -> BoxFuture<Result<()>> + Send + Sync>;

/// Called by an adapter for every accepted, normalized inbound message.
pub type MessageCallback = Arc<dyn Fn(InboundMessage, ReplyFn) -> BoxFuture<()> + Send + Sync>;

/// Called by an adapter after each complete status transition.
pub type StatusCallback = Arc<dyn Fn(GatewayStatus) + Send + Sync>;

/// Called by an adapter when its connection reports an error.
pub type ErrorCallback = Arc<dyn Fn(Platform, GatewayError) + Send + Sync>;

/// The callbacks an adapter uses to report back to the gateway.
#[derive(Clone)]
pub struct ChannelHandlers {
    pub on_message: MessageCallback,
    pub on_status_change: StatusCallback,
    pub on_error: ErrorCallback,
}

impl ChannelHandlers {
    /// Handlers that drop everything. Useful for probing adapters in isolation.
    pub fn noop() -> Self {
        Self {
            on_message: Arc::new(|_: InboundMessage, _: ReplyFn| -> BoxFuture<()> {
                Box::pin(async {})
            }),
            on_status_change: Arc::new(|_| {}),
            on_error: Arc::new(|_, _| {}),
        }
    }
}

impl std::fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandlers").finish_non_exhaustive()
    }
}

/// Wrap an async closure into a [`ReplyFn`].
pub fn reply_fn<F, Fut>(f: F) -> ReplyFn
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |text: String| -> BoxFuture<Result<()>> { Box::pin(f(text)) })
}

/// Every platform adapter implements this trait.
///
/// The `GatewayManager` holds `Arc<dyn ChannelPlugin>` and drives
/// start/stop/probe across all registered adapters.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Platform this adapter serves. Keys the registration.
    fn platform(&self) -> Platform;

    /// Normalize and validate a raw config. Must not have side effects.
    fn validate_config(&self, raw: &ChannelConfig) -> Result<ChannelConfig>;

    /// Establish the platform connection.
    ///
    /// Restarts (full stop first) when already running. Returns `Ok` without
    /// connecting when `config.enabled` is false. On failure, the adapter is
    /// left not running, the error is recorded in its status, and
    /// `handlers.on_error` is notified before the error is returned.
    async fn start(&self, config: &ChannelConfig, handlers: ChannelHandlers) -> Result<()>;

    /// Tear down the connection. A no-op when not running.
    async fn stop(&self) -> Result<()>;

    /// Check identity/auth directly against the platform, without touching
    /// adapter state. Works whether or not the adapter is running.
    async fn probe(&self, config: &ChannelConfig) -> ProbeResult;

    /// Snapshot of the current status (a copy, never a live reference).
    fn status(&self) -> GatewayStatus;
}
