//! `imgate channels` — inspect and diagnose chat channels from the CLI.
//!
//! - `imgate channels status` — configured channels at a glance
//! - `imgate channels test <platform>` — full connectivity test
//! - `imgate channels probe <platform>` — credential check only

use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;

use imgate_core::config::{load_config, ChannelConfig, Config};
use imgate_core::utils::mask_secret;
use imgate_core::{ConnectivityTestResult, Platform, Verdict};

use crate::gateway::build_manager;
use crate::helpers::{level_marker, verdict_label};

// ─────────────────────────────────────────────
// Subcommand enum
// ─────────────────────────────────────────────

/// Channels subcommands.
#[derive(Subcommand)]
pub enum ChannelsCommands {
    /// Show channel configuration status
    Status,

    /// Run the connectivity test for one platform
    Test {
        /// telegram, discord, feishu, dingtalk, or qq
        platform: Platform,

        /// Print the result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check a platform's credentials without starting it
    Probe {
        /// telegram, discord, feishu, dingtalk, or qq
        platform: Platform,
    },
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

/// Dispatch a channels subcommand.
pub async fn dispatch(cmd: ChannelsCommands, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    match cmd {
        ChannelsCommands::Status => channel_status(&config),
        ChannelsCommands::Test { platform, json } => channel_test(&config, platform, json).await,
        ChannelsCommands::Probe { platform } => channel_probe(&config, platform).await,
    }
}

fn channel_config(config: &Config, platform: Platform) -> ChannelConfig {
    config.channel(platform).cloned().unwrap_or_default()
}

// ─────────────────────────────────────────────
// Channel status
// ─────────────────────────────────────────────

/// Row for the status table.
struct ChannelRow {
    name: &'static str,
    available: bool,
    enabled: bool,
    detail: String,
}

fn channel_rows(config: &Config, available: &[Platform]) -> Vec<ChannelRow> {
    Platform::ALL
        .iter()
        .map(|&platform| {
            let channel = config.channel(platform);
            let detail = match channel {
                None => "not configured".to_string(),
                Some(ch) if !ch.has_credentials() => "no credentials".to_string(),
                Some(ch) if !ch.bot_token.trim().is_empty() => {
                    format!("token: {}", mask_secret(ch.bot_token.trim()))
                }
                Some(ch) => format!("app_id: {}", mask_secret(ch.app_id.trim())),
            };
            ChannelRow {
                name: platform.display_name(),
                available: available.contains(&platform),
                enabled: channel.is_some_and(|ch| ch.enabled),
                detail,
            }
        })
        .collect()
}

/// `imgate channels status`
fn channel_status(config: &Config) -> Result<()> {
    let manager = build_manager(config);
    let rows = channel_rows(config, &manager.platforms());

    println!();
    println!("{}", "  Channel Status".cyan().bold());
    println!();

    println!(
        "  {:<10} {:<10} {:<10} {}",
        "Channel".bold(),
        "Adapter".bold(),
        "Enabled".bold(),
        "Configuration".bold(),
    );
    println!("  {}", "─".repeat(60));

    for row in &rows {
        let adapter = if row.available {
            "✓".green().to_string()
        } else {
            "—".dimmed().to_string()
        };
        let enabled = if row.enabled {
            "✓".green().to_string()
        } else {
            "✗".dimmed().to_string()
        };
        println!("  {:<10} {:<10} {:<10} {}", row.name, adapter, enabled, row.detail);
    }

    println!();
    Ok(())
}

// ─────────────────────────────────────────────
// Connectivity test
// ─────────────────────────────────────────────

/// `imgate channels test <platform>`
async fn channel_test(config: &Config, platform: Platform, json: bool) -> Result<()> {
    let manager = build_manager(config);
    let result = manager
        .test_channel(platform, &channel_config(config, platform))
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_test_result(&result);
    }

    if result.verdict == Verdict::Fail {
        bail!("{} connectivity test failed", platform.display_name());
    }
    Ok(())
}

fn print_test_result(result: &ConnectivityTestResult) {
    println!();
    println!(
        "  {} {}",
        result.platform.display_name().cyan().bold(),
        format!("connectivity test · {}", result.tested_at.format("%Y-%m-%d %H:%M:%S UTC")).dimmed()
    );
    println!();

    for check in &result.checks {
        println!("  {}  {}", level_marker(check.level), check.message);
        if let Some(suggestion) = &check.suggestion {
            println!("          {}", format!("→ {suggestion}").dimmed());
        }
    }

    println!();
    println!("  Verdict: {}", verdict_label(result.verdict));
    println!();
}

// ─────────────────────────────────────────────
// Probe
// ─────────────────────────────────────────────

/// `imgate channels probe <platform>`
async fn channel_probe(config: &Config, platform: Platform) -> Result<()> {
    let manager = build_manager(config);
    let probe = manager
        .probe_channel(platform, &channel_config(config, platform))
        .await?;

    println!();
    if probe.ok {
        println!(
            "  {} {} authenticated as {}",
            "✓".green(),
            platform.display_name(),
            probe.bot_name.unwrap_or_default().bold()
        );
        println!();
        Ok(())
    } else {
        println!(
            "  {} {} probe failed: {}",
            "✗".red(),
            platform.display_name(),
            probe.error.unwrap_or_default()
        );
        println!();
        bail!("{} probe failed", platform.display_name())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
