//! Config loader — reads `~/.imgate/config.json`, applies legacy
//! migrations, and merges env vars.
//!
//! The gateway only ever reads configuration; writing it back is the job of
//! whatever settings surface owns the file.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.imgate/config.json`
//! 3. Environment variables `IMGATE_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{ChannelConfig, Config};
use crate::types::Platform;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let mut raw: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    drop_unknown_channels(&mut raw);
    migrate_config(&mut raw);

    let config: Config = match serde_json::from_value(raw) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to deserialize config: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Remove `channels` entries that name no known platform, so one stray key
/// doesn't discard the rest of the file.
fn drop_unknown_channels(raw: &mut serde_json::Value) {
    let Some(channels) = raw.get_mut("channels").and_then(|c| c.as_object_mut()) else {
        return;
    };

    channels.retain(|name, _| {
        let known = Platform::ALL.iter().any(|p| p.as_str() == name);
        if !known {
            warn!(channel = %name, "Ignoring config for unknown platform");
        }
        known
    });
}

/// Apply legacy config migrations to every channel entry.
///
/// - `token` → `botToken`
/// - `allowedUsers` → `allowFrom` (with `dmPolicy: "allowlist"` when non-empty)
///
/// Existing new-style keys are never overwritten.
fn migrate_config(raw: &mut serde_json::Value) {
    let Some(channels) = raw.get_mut("channels").and_then(|c| c.as_object_mut()) else {
        return;
    };

    for (name, channel) in channels.iter_mut() {
        let Some(obj) = channel.as_object_mut() else {
            continue;
        };

        if let Some(token) = obj.remove("token") {
            if !obj.contains_key("botToken") {
                obj.insert("botToken".into(), token);
                debug!(channel = %name, "Migrated token → botToken");
            }
        }

        if let Some(users) = obj.remove("allowedUsers") {
            if !obj.contains_key("allowFrom") {
                let restricts = users.as_array().is_some_and(|a| !a.is_empty());
                obj.insert("allowFrom".into(), users);
                if restricts && !obj.contains_key("dmPolicy") {
                    obj.insert("dmPolicy".into(), "allowlist".into());
                }
                debug!(channel = %name, "Migrated allowedUsers → allowFrom");
            }
        }
    }
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `IMGATE_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `IMGATE_GATEWAY__PROBE_TIMEOUT_SECS` → `gateway.probe_timeout_secs`
/// - `IMGATE_GATEWAY__INBOUND_IDLE_WARN_SECS` → `gateway.inbound_idle_warn_secs`
/// - `IMGATE_CHANNELS__<PLATFORM>__ENABLED` → `channels.<platform>.enabled`
/// - `IMGATE_CHANNELS__<PLATFORM>__BOT_TOKEN` → `channels.<platform>.bot_token`
/// - `IMGATE_CHANNELS__<PLATFORM>__APP_ID` → `channels.<platform>.app_id`
/// - `IMGATE_CHANNELS__<PLATFORM>__APP_SECRET` → `channels.<platform>.app_secret`
fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides read through `lookup` instead of the process env.
fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(n) = lookup("IMGATE_GATEWAY__PROBE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.gateway.probe_timeout_secs = n;
    }
    if let Some(n) = lookup("IMGATE_GATEWAY__INBOUND_IDLE_WARN_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.gateway.inbound_idle_warn_secs = n;
    }

    for platform in Platform::ALL {
        apply_channel_env(&mut config, platform, &lookup);
    }

    config
}

/// Apply env var overrides for a single channel, creating its entry if needed.
fn apply_channel_env(config: &mut Config, platform: Platform, lookup: &impl Fn(&str) -> Option<String>) {
    let prefix = format!("IMGATE_CHANNELS__{}", platform.as_str().to_ascii_uppercase());
    let var = |field: &str| lookup(&format!("{prefix}__{field}"));

    let enabled = var("ENABLED");
    let bot_token = var("BOT_TOKEN");
    let app_id = var("APP_ID");
    let app_secret = var("APP_SECRET");

    if enabled.is_none() && bot_token.is_none() && app_id.is_none() && app_secret.is_none() {
        return;
    }

    let channel: &mut ChannelConfig = config.channels.entry(platform).or_default();
    if let Some(val) = enabled {
        channel.enabled = val == "true" || val == "1";
    }
    if let Some(val) = bot_token {
        channel.bot_token = val;
    }
    if let Some(val) = app_id {
        channel.app_id = val;
    }
    if let Some(val) = app_secret {
        channel.app_secret = val;
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
