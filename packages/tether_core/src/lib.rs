//! Player directory, presence diffing, relay queues, and control-connection
//! state primitives for Tether.

pub mod connection;
pub mod directory;
pub mod error;
pub mod presence;
pub mod queue;

pub use connection::{Backoff, ConnectionMachine, ConnectionState};
pub use directory::{PlayerDirectory, PlayerRecord};
pub use error::QueueError;
pub use presence::{PresenceDiff, PresenceEvent, PresenceReconciler};
pub use queue::{
    CorrelatedQueue, FireAndForgetQueue, LookupOutcome, LookupResponse, PendingLookup,
    TeleportCommand, TeleportTarget,
};
