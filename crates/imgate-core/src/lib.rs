//! imgate core — the data model, event bus, and configuration shared by
//! the channel adapters, the gateway manager, and the CLI.

pub mod bus;
pub mod config;
pub mod types;
pub mod utils;

pub use types::{
    ChatType, CheckLevel, ConnectivityCheck, ConnectivityTestResult, GatewayStatus,
    InboundMessage, Platform, ProbeResult, Verdict,
};
