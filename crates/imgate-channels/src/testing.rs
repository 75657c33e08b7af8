//! In-memory channel plugin for manager and diagnostics tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use imgate_core::config::ChannelConfig;
use imgate_core::{ChatType, GatewayStatus, InboundMessage, Platform, ProbeResult};

use crate::base::{reply_fn, ChannelHandlers, ChannelPlugin};
use crate::error::{GatewayError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeMode {
    Ok,
    Fail,
    Hang,
}

/// Mock channel for testing.
pub struct MockChannel {
    platform: Platform,
    status: Mutex<GatewayStatus>,
    handlers: Mutex<Option<ChannelHandlers>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub probes: AtomicUsize,
    /// Hanging calls that ran to completion instead of being dropped.
    pub hangs_finished: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub fail_replies: AtomicBool,
    probe_mode: Mutex<ProbeMode>,
    pub replies: Arc<Mutex<Vec<String>>>,
}

impl MockChannel {
    pub fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            status: Mutex::new(GatewayStatus::idle(platform)),
            handlers: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            hangs_finished: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            fail_replies: AtomicBool::new(false),
            probe_mode: Mutex::new(ProbeMode::Ok),
            replies: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn set_probe(&self, mode: ProbeMode) {
        *self.probe_mode.lock().unwrap() = mode;
    }

    pub fn update_status(&self, f: impl FnOnce(&mut GatewayStatus)) {
        f(&mut self.status.lock().unwrap());
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().unwrap().clone()
    }

    /// Push an inbound message through the handlers given at `start()` and
    /// wait for the gateway to finish with it.
    pub async fn deliver(&self, content: &str) {
        let handlers = self.handlers.lock().unwrap().clone();
        let Some(handlers) = handlers else {
            panic!("deliver() before start()");
        };

        let sink = self.replies.clone();
        let fail = self.fail_replies.load(Ordering::SeqCst);
        let reply = reply_fn(move |text: String| {
            let sink = sink.clone();
            async move {
                if fail {
                    return Err(GatewayError::Delivery("send refused".into()));
                }
                sink.lock().unwrap().push(text);
                Ok(())
            }
        });

        (handlers.on_message)(message(self.platform, content), reply).await;
    }
}

pub fn message(platform: Platform, content: &str) -> InboundMessage {
    InboundMessage {
        platform,
        message_id: "m1".into(),
        conversation_id: "chat-1".into(),
        sender_id: "user-1".into(),
        sender_name: "Ada".into(),
        content: content.into(),
        chat_type: ChatType::Direct,
        timestamp: Utc::now(),
    }
}

pub fn enabled_config() -> ChannelConfig {
    ChannelConfig {
        enabled: true,
        bot_token: "123:abc".into(),
        ..Default::default()
    }
}

#[async_trait]
impl ChannelPlugin for MockChannel {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn validate_config(&self, raw: &ChannelConfig) -> Result<ChannelConfig> {
        if raw.bot_token.is_empty() {
            return Err(GatewayError::ConfigInvalid("bot token is required".into()));
        }
        Ok(raw.clone())
    }

    async fn start(&self, config: &ChannelConfig, handlers: ChannelHandlers) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !config.enabled {
            return Ok(());
        }

        if self.fail_start.load(Ordering::SeqCst) {
            let err = GatewayError::AuthFailed("Unauthorized".into());
            self.update_status(|s| {
                *s = GatewayStatus {
                    enabled: true,
                    error: Some(err.to_string()),
                    ..GatewayStatus::idle(self.platform)
                }
            });
            (handlers.on_error)(self.platform, err.clone());
            return Err(err);
        }

        let status = GatewayStatus {
            connected: true,
            enabled: true,
            bot_name: Some("mockbot".into()),
            started_at: Some(Utc::now()),
            ..GatewayStatus::idle(self.platform)
        };
        *self.status.lock().unwrap() = status.clone();
        *self.handlers.lock().unwrap() = Some(handlers.clone());
        (handlers.on_status_change)(status);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.update_status(|s| {
            s.connected = false;
            s.started_at = None;
        });
        self.handlers.lock().unwrap().take();
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("stop failed".into()));
        }
        Ok(())
    }

    async fn probe(&self, _config: &ChannelConfig) -> ProbeResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let mode = *self.probe_mode.lock().unwrap();
        match mode {
            ProbeMode::Ok => ProbeResult::success("mockbot"),
            ProbeMode::Fail => ProbeResult::failure("Unauthorized"),
            ProbeMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                self.hangs_finished.fetch_add(1, Ordering::SeqCst);
                ProbeResult::failure("unreachable")
            }
        }
    }

    fn status(&self) -> GatewayStatus {
        self.status.lock().unwrap().clone()
    }
}
