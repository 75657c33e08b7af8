//! Core types for the IM gateway — the normalized data model shared by
//! every channel adapter and the gateway manager.
//!
//! Adapters translate platform-native payloads into these types; the
//! downstream handler only ever sees [`InboundMessage`], and observers only
//! ever see [`GatewayStatus`] snapshots.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────

/// Identifier of one messaging platform integration.
///
/// Each value keys exactly one adapter registration and one config entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Discord,
    Feishu,
    Dingtalk,
    Qq,
}

impl Platform {
    /// All known platforms, in display order.
    pub const ALL: [Platform; 5] = [
        Platform::Telegram,
        Platform::Discord,
        Platform::Feishu,
        Platform::Dingtalk,
        Platform::Qq,
    ];

    /// Lowercase identifier used in config keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Discord => "discord",
            Platform::Feishu => "feishu",
            Platform::Dingtalk => "dingtalk",
            Platform::Qq => "qq",
        }
    }

    /// Human-readable name for tables and messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Telegram => "Telegram",
            Platform::Discord => "Discord",
            Platform::Feishu => "Feishu",
            Platform::Dingtalk => "DingTalk",
            Platform::Qq => "QQ",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| format!("unknown platform: {s}"))
    }
}

// ─────────────────────────────────────────────
// Inbound messages
// ─────────────────────────────────────────────

/// Conversation kind an inbound message arrived in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

/// The normalized representation every adapter produces.
///
/// This is the only message type the downstream handler understands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub platform: Platform,
    /// Platform-native message identifier.
    pub message_id: String,
    /// Conversation (chat) the reply must go back to.
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub chat_type: ChatType,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Session key combining platform and conversation (e.g. "telegram:123456").
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.platform, self.conversation_id)
    }
}

// ─────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────

/// Liveness record of one channel.
///
/// Written only by the owning adapter, always as a complete record.
/// `connected` and `enabled` are independent: an enabled channel may be
/// currently disconnected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub platform: Platform,
    pub connected: bool,
    pub enabled: bool,
    pub error: Option<String>,
    pub bot_name: Option<String>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

impl GatewayStatus {
    /// A never-started, disconnected status record.
    pub fn idle(platform: Platform) -> Self {
        Self {
            platform,
            connected: false,
            enabled: false,
            error: None,
            bot_name: None,
            last_inbound_at: None,
            last_outbound_at: None,
            started_at: None,
        }
    }
}

/// Outcome of a connection-independent identity check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub ok: bool,
    pub bot_name: Option<String>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(bot_name: impl Into<String>) -> Self {
        Self {
            ok: true,
            bot_name: Some(bot_name.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            bot_name: None,
            error: Some(error.into()),
        }
    }
}

// ─────────────────────────────────────────────
// Connectivity diagnostics
// ─────────────────────────────────────────────

/// Severity of a single diagnostic finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Pass,
    Warn,
    Fail,
    Info,
}

impl fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckLevel::Pass => "pass",
            CheckLevel::Warn => "warn",
            CheckLevel::Fail => "fail",
            CheckLevel::Info => "info",
        })
    }
}

/// Worst-case severity across all checks of a connectivity test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Fail => "fail",
        })
    }
}

/// One diagnostic finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityCheck {
    pub code: String,
    pub level: CheckLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ConnectivityCheck {
    pub fn new(code: impl Into<String>, level: CheckLevel, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            level,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Ordered accumulation of checks plus the derived verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityTestResult {
    pub platform: Platform,
    pub tested_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub checks: Vec<ConnectivityCheck>,
}

impl ConnectivityTestResult {
    /// Build a result, deriving the verdict from the checks.
    pub fn from_checks(platform: Platform, checks: Vec<ConnectivityCheck>) -> Self {
        Self {
            platform,
            tested_at: Utc::now(),
            verdict: derive_verdict(&checks),
            checks,
        }
    }
}

/// `fail` if any check failed, else `warn` if any warned, else `pass`.
pub fn derive_verdict(checks: &[ConnectivityCheck]) -> Verdict {
    if checks.iter().any(|c| c.level == CheckLevel::Fail) {
        Verdict::Fail
    } else if checks.iter().any(|c| c.level == CheckLevel::Warn) {
        Verdict::Warn
    } else {
        Verdict::Pass
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
