//! Gateway command — runs every enabled channel until Ctrl+C.
//!
//! Startup sequence:
//! 1. Load config
//! 2. Build the gateway manager and register the compiled-in adapters
//! 3. Install the message handler (echo, standing in for an agent)
//! 4. Log bus events in the background
//! 5. Start all enabled channels
//! 6. Ctrl+C stops every channel

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use imgate_channels::{message_handler, GatewayManager, MessageHandler, ReplyFn};
use imgate_core::bus::{EventBus, GatewayEvent};
use imgate_core::config::{load_config, Config};
use imgate_core::utils::truncate_string;
use imgate_core::InboundMessage;

use crate::helpers;

/// Build a manager with every adapter compiled into this binary.
pub fn build_manager(config: &Config) -> GatewayManager {
    let manager = GatewayManager::new(Arc::new(EventBus::default())).with_settings(&config.gateway);

    #[cfg(feature = "telegram")]
    manager.register_channel(Arc::new(imgate_channels::telegram::TelegramAdapter::new()));

    manager
}

/// Run the gateway.
pub async fn run(config_path: Option<&Path>) -> Result<()> {
    println!();
    helpers::print_banner();
    println!("  Mode: Gateway");
    println!();

    let config = load_config(config_path);
    let manager = build_manager(&config);
    manager.set_message_handler(echo_handler());

    let event_log = tokio::spawn(log_events(manager.subscribe()));

    let enabled = config.channels.values().filter(|c| c.enabled).count();
    info!(
        registered = ?manager.platforms(),
        enabled,
        "gateway starting"
    );

    let started = manager.start_all_enabled(&config.channels).await;

    println!("  Channels:  {started} of {enabled} enabled started");
    for status in manager.get_all_status() {
        if status.connected {
            println!(
                "    {} {}",
                status.platform.display_name(),
                status.bot_name.unwrap_or_default()
            );
        } else if let Some(error) = status.error {
            println!("    {} failed: {error}", status.platform.display_name());
        }
    }
    println!();

    if enabled == 0 {
        println!("  ⚠  No channels enabled.");
        println!("     Configure channels in ~/.imgate/config.json");
        println!();
    }

    println!("  Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    println!();
    println!("  Shutting down...");
    info!("received Ctrl+C, shutting down");
    manager.stop_all().await;
    event_log.abort();

    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

/// Reply text for the echo handler.
fn echo_reply(message: &InboundMessage) -> String {
    format!("{}: {}", message.sender_name, message.content)
}

fn echo_handler() -> MessageHandler {
    message_handler(|message: InboundMessage, reply: ReplyFn| async move {
        debug!(session = %message.session_key(), "echoing message");
        reply(echo_reply(&message))
            .await
            .context("echo reply failed")?;
        anyhow::Ok(())
    })
}

async fn log_events(mut events: broadcast::Receiver<GatewayEvent>) {
    loop {
        match events.recv().await {
            Ok(GatewayEvent::StatusChange(statuses)) => {
                for status in statuses {
                    debug!(
                        platform = %status.platform,
                        connected = status.connected,
                        error = ?status.error,
                        "channel status"
                    );
                }
            }
            Ok(GatewayEvent::Message(message)) => info!(
                platform = %message.platform,
                chat_id = %message.conversation_id,
                sender = %message.sender_name,
                preview = %truncate_string(&message.content, 80),
                "inbound message"
            ),
            Ok(GatewayEvent::Error { platform, error }) => {
                warn!(platform = %platform, error = %error, "channel error")
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
