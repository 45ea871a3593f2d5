//! The one shared bridge context, built once in `main` and injected into the
//! dispatcher, the relay handlers and the presence poller.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{CorrelatedQueue, FireAndForgetQueue, PlayerDirectory, TeleportCommand};
use tokio::sync::RwLock;

use crate::game_api::GameApi;
use crate::metrics::BridgeMetrics;

pub struct BridgeContext {
    pub directory: RwLock<PlayerDirectory>,
    /// Movement commands, drained in full by each script poll.
    pub teleports: FireAndForgetQueue<TeleportCommand>,
    /// Position lookups answered by the script.
    pub locations: CorrelatedQueue,
    /// Inventory lookups answered by the script.
    pub inventories: CorrelatedQueue,
    pub game: Arc<dyn GameApi>,
    pub metrics: Arc<BridgeMetrics>,
}

impl BridgeContext {
    pub fn new(game: Arc<dyn GameApi>, lookup_timeout: Duration, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            directory: RwLock::new(PlayerDirectory::new()),
            teleports: FireAndForgetQueue::new(),
            locations: CorrelatedQueue::new(lookup_timeout),
            inventories: CorrelatedQueue::new(lookup_timeout),
            game,
            metrics,
        }
    }
}
