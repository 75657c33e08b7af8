//! Configuration system — schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use imgate_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Probe timeout: {}s", cfg.gateway.probe_timeout_secs);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config};
pub use schema::{ChannelConfig, Config, DmPolicy, GatewaySettings, GroupPolicy};
