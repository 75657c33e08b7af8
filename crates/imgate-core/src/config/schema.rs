//! Configuration schema — gateway settings and per-platform channel configs.
//!
//! Hierarchy: `Config` → `GatewaySettings`, `channels: { <platform>: ChannelConfig }`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! We use `#[serde(rename_all = "camelCase")]` to handle the conversion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Platform;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.imgate/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub gateway: GatewaySettings,
    pub channels: BTreeMap<Platform, ChannelConfig>,
}

impl Config {
    /// Config for one platform, if present.
    pub fn channel(&self, platform: Platform) -> Option<&ChannelConfig> {
        self.channels.get(&platform)
    }
}

// ─────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────

/// Tunables of the gateway manager and its connectivity test.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// How long the auth probe may take before it is declared failed.
    pub probe_timeout_secs: u64,
    /// Uptime after which a channel with no inbound traffic is flagged.
    pub inbound_idle_warn_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            inbound_idle_warn_secs: 120,
        }
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Which group conversations may reach the handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Reject every group message.
    Disabled,
    /// Accept only chats or senders listed in `group_allow_from`.
    Allowlist,
    #[default]
    #[serde(alias = "open")]
    Unrestricted,
}

/// Which direct conversations may reach the handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Accept only senders listed in `allow_from`.
    Allowlist,
    #[default]
    #[serde(alias = "open")]
    Unrestricted,
}

/// Per-platform channel settings.
///
/// Credentials are a superset across platforms: Telegram and Discord use
/// `bot_token`, Feishu/DingTalk/QQ use `app_id` + `app_secret`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub app_id: String,
    pub app_secret: String,
    /// Override of the platform API endpoint (self-hosted Bot API, tests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Long-poll fetch timeout in seconds.
    pub poll_timeout_secs: u32,
    pub group_policy: GroupPolicy,
    /// Chat or sender IDs allowed when `group_policy = "allowlist"`.
    pub group_allow_from: Vec<String>,
    pub dm_policy: DmPolicy,
    /// Sender IDs allowed when `dm_policy = "allowlist"`.
    pub allow_from: Vec<String>,
    /// In groups, only react when the bot is @-mentioned.
    pub require_mention: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            app_id: String::new(),
            app_secret: String::new(),
            api_base: None,
            poll_timeout_secs: 30,
            group_policy: GroupPolicy::default(),
            group_allow_from: Vec::new(),
            dm_policy: DmPolicy::default(),
            allow_from: Vec::new(),
            require_mention: true,
        }
    }
}

impl ChannelConfig {
    /// Whether any credential field is filled in.
    pub fn has_credentials(&self) -> bool {
        !self.bot_token.trim().is_empty()
            || (!self.app_id.trim().is_empty() && !self.app_secret.trim().is_empty())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
