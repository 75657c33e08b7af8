//! Bot API transport over `teloxide::Bot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, ChatId, ParseMode, Update, User};
use teloxide::{ApiError, RequestError};
use tracing::debug;

use imgate_core::config::ChannelConfig;

use super::transport::{TelegramTransport, TransportFactory};
use crate::error::{GatewayError, Result};

/// Headroom on top of the long-poll timeout before the HTTP request is
/// abandoned.
const HTTP_TIMEOUT_SLACK_SECS: u64 = 10;

/// `teloxide` bot bound to one token.
pub struct BotApiClient {
    bot: Bot,
    /// Only kept to scrub it from error text. Never logged.
    token: String,
}

impl std::fmt::Debug for BotApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiClient").finish_non_exhaustive()
    }
}

impl BotApiClient {
    pub fn new(token: &str, api_base: Option<&str>, poll_timeout_secs: u32) -> Result<Self> {
        // The client must outlive the long poll or every idle fetch errors out.
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(
                u64::from(poll_timeout_secs) + HTTP_TIMEOUT_SLACK_SECS,
            ))
            .build()
            .map_err(|e| GatewayError::Connection(format!("failed to build HTTP client: {e}")))?;

        let mut bot = Bot::with_client(token, client);
        if let Some(base) = api_base {
            // Trailing slash so `bot{token}/{method}` is joined under any path.
            let url = reqwest::Url::parse(&format!("{}/", base.trim_end_matches('/')))
                .map_err(|e| GatewayError::ConfigInvalid(format!("invalid apiBase {base:?}: {e}")))?;
            bot = bot.set_api_url(url);
        }

        Ok(Self {
            bot,
            token: token.to_string(),
        })
    }

    fn request_error(&self, method: &str, err: RequestError) -> GatewayError {
        debug!(method, "Bot API call failed");
        match err {
            RequestError::Api(ApiError::InvalidToken) => {
                GatewayError::AuthFailed("Telegram rejected the bot token".into())
            }
            other => GatewayError::Connection(format!(
                "{method}: {}",
                other.to_string().replace(&self.token, "<token>")
            )),
        }
    }
}

#[async_trait]
impl TelegramTransport for BotApiClient {
    async fn get_me(&self) -> Result<User> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| self.request_error("getMe", e))?;
        Ok(me.user)
    }

    async fn get_updates(&self, offset: i32, timeout_secs: u32) -> Result<Vec<Update>> {
        self.bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await
            .map_err(|e| self.request_error("getUpdates", e))
    }

    async fn send_message(&self, chat_id: ChatId, text: &str, parse_mode: Option<ParseMode>) -> Result<()> {
        let request = self.bot.send_message(chat_id, text);
        let sent = match parse_mode {
            Some(mode) => request.parse_mode(mode).await,
            None => request.await,
        };
        sent.map(|_| ())
            .map_err(|e| self.request_error("sendMessage", e))
    }
}

/// Builds a [`BotApiClient`] from a channel config.
#[derive(Clone, Copy, Debug, Default)]
pub struct BotApiFactory;

impl TransportFactory for BotApiFactory {
    fn connect(&self, config: &ChannelConfig) -> Result<Arc<dyn TelegramTransport>> {
        let token = config.bot_token.trim();
        if token.is_empty() {
            return Err(GatewayError::ConfigInvalid(
                "Telegram bot token is required".into(),
            ));
        }
        let client = BotApiClient::new(token, config.api_base.as_deref(), config.poll_timeout_secs)?;
        Ok(Arc::new(client))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
