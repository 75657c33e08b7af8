//! Transport seam between the Telegram adapter and the wire client.
//!
//! The adapter only talks to [`TelegramTransport`]; the concrete client is
//! produced by a [`TransportFactory`] at `start()`/`probe()` time, so a
//! channel that is never enabled never builds a bot client, and tests can
//! substitute an in-memory transport. Payloads are `teloxide` types.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::types::{ChatId, ParseMode, Update, User};

use imgate_core::config::ChannelConfig;

use crate::error::Result;

/// Calls the adapter needs from a Telegram client.
#[async_trait]
pub trait TelegramTransport: Send + Sync {
    /// Identity of the bot the token belongs to.
    async fn get_me(&self) -> Result<User>;

    /// Long-poll for updates with `update_id >= offset`, waiting at most
    /// `timeout_secs` for one to arrive.
    async fn get_updates(&self, offset: i32, timeout_secs: u32) -> Result<Vec<Update>>;

    /// Send `text` to `chat_id`, optionally with a parse mode.
    async fn send_message(&self, chat_id: ChatId, text: &str, parse_mode: Option<ParseMode>) -> Result<()>;
}

/// Builds a transport for a validated channel config.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, config: &ChannelConfig) -> Result<Arc<dyn TelegramTransport>>;
}

/// "First Last", falling back to the handle, then the numeric id.
pub fn display_name(user: &User) -> String {
    let full = user.full_name();
    let full = full.trim();
    if !full.is_empty() {
        return full.to_string();
    }
    match user.username.as_deref() {
        Some(handle) if !handle.is_empty() => handle.to_string(),
        _ => user.id.0.to_string(),
    }
}
