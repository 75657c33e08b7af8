//! Gateway error taxonomy.

use imgate_core::Platform;
use thiserror::Error;

/// Errors raised by channel adapters and the gateway manager.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The channel config is missing required fields or is malformed.
    /// Raised before any connection attempt.
    #[error("invalid channel config: {0}")]
    ConfigInvalid(String),

    /// No adapter is registered for the platform.
    #[error("channel not registered: {0}")]
    NotRegistered(Platform),

    /// The platform rejected the credentials or the identity lookup failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Runtime error on the live connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// An outbound message could not be delivered.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The injected message handler failed.
    #[error("message handler failed: {0}")]
    Handler(String),

    /// An operation exceeded its time budget.
    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },
}

pub type Result<T> = std::result::Result<T, GatewayError>;
