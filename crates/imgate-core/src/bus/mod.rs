//! Publish/subscribe surface between the gateway and its observers.

pub mod queue;
pub mod types;

pub use queue::EventBus;
pub use types::GatewayEvent;
