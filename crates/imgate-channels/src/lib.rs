//! imgate channels — platform adapters and the gateway that drives them.
//!
//! This crate provides:
//! - **base**: the `ChannelPlugin` trait every platform adapter implements
//! - **manager**: `GatewayManager`, covering registry, routing, lifecycle, and status
//! - **connectivity**: `GatewayManager::test_channel` diagnostics
//! - **policy**: group / direct-message access rules
//! - **formatting**: outbound splitting and Markdown → HTML
//!
//! Platform adapters are feature-gated modules.

pub mod base;
pub mod connectivity;
pub mod error;
pub mod formatting;
pub mod manager;
pub mod policy;

#[cfg(feature = "telegram")]
pub mod telegram;

#[cfg(test)]
pub(crate) mod testing;

pub use base::{reply_fn, ChannelHandlers, ChannelPlugin, ReplyFn};
pub use error::{GatewayError, Result};
pub use manager::{message_handler, GatewayManager, MessageHandler};
