//! Connectivity diagnostics — an ordered check list with a derived verdict.
//!
//! Hard steps stop at the first failure and return a single-check result:
//! 1. the adapter is registered
//! 2. the config validates
//! 3. the auth probe succeeds within the probe timeout
//!
//! Soft steps each append one finding and never stop the run: gateway
//! state, inbound activity, outbound activity, platform hints, and the
//! last recorded error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use imgate_core::config::ChannelConfig;
use imgate_core::{
    CheckLevel, ConnectivityCheck, ConnectivityTestResult, GatewayStatus, Platform, ProbeResult,
};

use crate::base::ChannelPlugin;
use crate::error::{GatewayError, Result};
use crate::manager::GatewayManager;

impl GatewayManager {
    /// Validate `config` and run only the auth probe, bounded by the probe
    /// timeout.
    pub async fn probe_channel(&self, platform: Platform, config: &ChannelConfig) -> Result<ProbeResult> {
        let adapter = self
            .get_channel(platform)
            .ok_or(GatewayError::NotRegistered(platform))?;
        let config = adapter.validate_config(config)?;
        self.timed_probe(adapter.as_ref(), &config).await
    }

    async fn timed_probe(&self, adapter: &dyn ChannelPlugin, config: &ChannelConfig) -> Result<ProbeResult> {
        debug!(platform = %adapter.platform(), timeout = ?self.probe_timeout, "probing channel credentials");
        tokio::time::timeout(self.probe_timeout, adapter.probe(config))
            .await
            .map_err(|_| GatewayError::Timeout {
                ms: u64::try_from(self.probe_timeout.as_millis()).unwrap_or(u64::MAX),
            })
    }

    /// Diagnose one channel against `config`.
    pub async fn test_channel(
        &self,
        platform: Platform,
        config: &ChannelConfig,
    ) -> ConnectivityTestResult {
        let Some(adapter) = self.get_channel(platform) else {
            return single(
                platform,
                ConnectivityCheck::new(
                    "channel_not_registered",
                    CheckLevel::Fail,
                    format!("{} channel is not available in this gateway", platform.display_name()),
                )
                .with_suggestion("Build the gateway with this platform's feature enabled."),
            );
        };

        let config = match adapter.validate_config(config) {
            Ok(config) => config,
            Err(e) => {
                let reason = match e {
                    GatewayError::ConfigInvalid(reason) => reason,
                    other => other.to_string(),
                };
                return single(
                    platform,
                    ConnectivityCheck::new(
                        "config_invalid",
                        CheckLevel::Fail,
                        "Channel configuration is invalid",
                    )
                    .with_suggestion(reason),
                );
            }
        };

        let mut checks = Vec::new();

        match self.timed_probe(adapter.as_ref(), &config).await {
            Ok(probe) if probe.ok => {
                let name = probe.bot_name.unwrap_or_else(|| "unknown".into());
                checks.push(ConnectivityCheck::new(
                    "auth_check",
                    CheckLevel::Pass,
                    format!("Authenticated as {name}"),
                ));
            }
            Ok(probe) => {
                let reason = probe.error.unwrap_or_else(|| "unknown error".into());
                return single(
                    platform,
                    ConnectivityCheck::new(
                        "auth_check",
                        CheckLevel::Fail,
                        format!("Authentication failed: {reason}"),
                    )
                    .with_suggestion(credential_hint(platform)),
                );
            }
            Err(_) => {
                return single(
                    platform,
                    ConnectivityCheck::new(
                        "auth_check",
                        CheckLevel::Fail,
                        format!(
                            "Authentication check timed out after {}s",
                            self.probe_timeout.as_secs_f64()
                        ),
                    )
                    .with_suggestion(
                        "Check network access to the platform API (proxy, firewall, DNS).",
                    ),
                );
            }
        }

        let status = adapter.status();
        let now = Utc::now();

        checks.push(running_check(&status));
        checks.extend(inbound_check(&status, self.inbound_idle_threshold, now));
        checks.extend(outbound_check(&status));
        checks.extend(platform_hints(platform));
        checks.extend(last_error_check(&status));

        let result = ConnectivityTestResult::from_checks(platform, checks);
        info!(platform = %platform, verdict = %result.verdict, "connectivity test finished");
        result
    }
}

fn single(platform: Platform, check: ConnectivityCheck) -> ConnectivityTestResult {
    info!(platform = %platform, code = %check.code, "connectivity test failed");
    ConnectivityTestResult::from_checks(platform, vec![check])
}

fn credential_hint(platform: Platform) -> &'static str {
    match platform {
        Platform::Telegram => "Check the bot token issued by @BotFather.",
        Platform::Discord => "Check the bot token in the Discord Developer Portal.",
        Platform::Feishu | Platform::Dingtalk | Platform::Qq => {
            "Check the app ID and app secret in the platform's developer console."
        }
    }
}

fn running_check(status: &GatewayStatus) -> ConnectivityCheck {
    if status.connected {
        ConnectivityCheck::new("gateway_running", CheckLevel::Pass, "Channel is connected")
    } else if status.enabled {
        ConnectivityCheck::new(
            "gateway_running",
            CheckLevel::Warn,
            "Channel is enabled but not connected",
        )
        .with_suggestion("Check network access and the channel config, then restart the gateway.")
    } else {
        ConnectivityCheck::new(
            "gateway_running",
            CheckLevel::Info,
            "Channel is not running (not enabled)",
        )
    }
}

/// Only judged while connected with a known start time.
fn inbound_check(
    status: &GatewayStatus,
    idle_threshold: Duration,
    now: DateTime<Utc>,
) -> Option<ConnectivityCheck> {
    if !status.connected {
        return None;
    }
    let started_at = status.started_at?;

    if let Some(last) = status.last_inbound_at {
        return Some(ConnectivityCheck::new(
            "inbound_activity",
            CheckLevel::Pass,
            format!("Inbound messages received (last at {})", last.to_rfc3339()),
        ));
    }

    // Negative uptime (clock skew) counts as zero.
    let uptime = (now - started_at).to_std().unwrap_or_default();
    if uptime > idle_threshold {
        Some(
            ConnectivityCheck::new(
                "inbound_activity",
                CheckLevel::Warn,
                format!("No inbound messages in the {}s since start", uptime.as_secs()),
            )
            .with_suggestion(
                "Send the bot a direct message. In groups, check that the bot can see messages.",
            ),
        )
    } else {
        Some(ConnectivityCheck::new(
            "inbound_activity",
            CheckLevel::Info,
            format!("Connected {}s ago; too early to judge inbound traffic", uptime.as_secs()),
        ))
    }
}

/// Only judged once something has come in.
fn outbound_check(status: &GatewayStatus) -> Option<ConnectivityCheck> {
    status.last_inbound_at?;
    Some(match status.last_outbound_at {
        Some(last) => ConnectivityCheck::new(
            "outbound_activity",
            CheckLevel::Pass,
            format!("Replies delivered (last at {})", last.to_rfc3339()),
        ),
        None => ConnectivityCheck::new(
            "outbound_activity",
            CheckLevel::Warn,
            "Messages were received but no reply has been delivered",
        )
        .with_suggestion("Check the message handler and the bot's permission to post."),
    })
}

fn platform_hints(platform: Platform) -> Vec<ConnectivityCheck> {
    let hint = |code: &str, message: &str, suggestion: &str| {
        ConnectivityCheck::new(code, CheckLevel::Info, message).with_suggestion(suggestion)
    };

    match platform {
        Platform::Telegram => vec![
            hint(
                "telegram_group_mention",
                "In groups the bot only answers messages that @mention it",
                "To let the bot see all group messages, disable privacy mode with /setprivacy in @BotFather.",
            ),
            hint(
                "telegram_single_poller",
                "Only one process may poll a bot token at a time",
                "Stop other instances using this token if polling reports 409 Conflict.",
            ),
        ],
        Platform::Discord => vec![hint(
            "discord_message_content",
            "Reading message text needs the Message Content intent",
            "Enable it under Bot > Privileged Gateway Intents in the Developer Portal.",
        )],
        Platform::Feishu => vec![hint(
            "feishu_event_subscription",
            "The app must subscribe to the message receive event",
            "Add im.message.receive_v1, enable the bot capability, and publish a new app version.",
        )],
        Platform::Dingtalk => vec![hint(
            "dingtalk_stream_mode",
            "The robot must use Stream mode and be @mentioned in groups",
            "Switch the robot's message receiving mode to Stream in the developer console.",
        )],
        Platform::Qq => vec![hint(
            "qq_group_mention",
            "QQ bots only receive group messages that @mention them",
            "Mention the bot in group chats, or test in a direct message.",
        )],
    }
}

fn last_error_check(status: &GatewayStatus) -> Option<ConnectivityCheck> {
    let error = status.error.as_deref()?;
    Some(if status.connected {
        ConnectivityCheck::new(
            "last_error",
            CheckLevel::Warn,
            format!("Last recorded error: {error}"),
        )
        .with_suggestion("The connection is up and retrying; check the logs if this repeats.")
    } else {
        ConnectivityCheck::new(
            "last_error",
            CheckLevel::Fail,
            format!("Last recorded error: {error}"),
        )
        .with_suggestion("Fix the cause above and restart the channel.")
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
