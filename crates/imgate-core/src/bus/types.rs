//! Bus event types — notifications flowing from the gateway to observers
//! (UI, persistence, the CLI event log).

use crate::types::{GatewayStatus, InboundMessage, Platform};

/// A gateway notification.
///
/// Every status-affecting operation ends with a `StatusChange` carrying the
/// complete set of channel statuses, so observers never see stale state.
#[derive(Clone, Debug)]
pub enum GatewayEvent {
    /// Snapshot of every registered channel's status.
    StatusChange(Vec<GatewayStatus>),
    /// A normalized inbound message, published before the handler runs.
    Message(InboundMessage),
    /// An error raised by a channel.
    Error { platform: Platform, error: String },
}

impl GatewayEvent {
    /// Event name as exposed to observers.
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::StatusChange(_) => "statusChange",
            GatewayEvent::Message(_) => "message",
            GatewayEvent::Error { .. } => "error",
        }
    }
}
