//! Control channel to the management platform.

pub mod client;
pub mod protocol;

use tether_core::ConnectionState;

pub use client::{ControlChannel, ControlConfig};
pub use protocol::ClientMessage;

/// Outbound half of the control channel, as seen by the relay and the
/// presence poller.
pub trait ControlLink: Send + Sync {
    /// Queue a message for the platform. Returns false, and drops the
    /// message, when the channel is not ready.
    fn send(&self, msg: ClientMessage) -> bool;

    fn state(&self) -> ConnectionState;
}
