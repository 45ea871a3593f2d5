//! Periodic presence poll.
//!
//! Every interval the game's player list is fetched, reconciled against the
//! previous snapshot, and each connect/disconnect goes out as a control
//! channel event.

use std::sync::Arc;
use std::time::Duration;

use tether_core::{PlayerRecord, PresenceEvent, PresenceReconciler};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::control::{ClientMessage, ControlLink};
use crate::game_api::GameApiError;

pub struct PresencePoller {
    ctx: Arc<BridgeContext>,
    link: Arc<dyn ControlLink>,
    reconciler: PresenceReconciler,
}

impl PresencePoller {
    pub fn new(ctx: Arc<BridgeContext>, link: Arc<dyn ControlLink>) -> Self {
        Self {
            ctx,
            link,
            reconciler: PresenceReconciler::new(),
        }
    }

    /// Run one cycle. A failed fetch leaves the last known set untouched.
    pub async fn poll_once(&mut self) -> Result<Vec<PresenceEvent>, GameApiError> {
        let players = self.ctx.game.players().await?;
        let snapshot: Vec<PlayerRecord> = players.iter().map(|p| p.record()).collect();

        let events = {
            let mut directory = self.ctx.directory.write().await;
            self.reconciler.reconcile(&snapshot, &mut directory)
        };

        for event in &events {
            self.ctx.metrics.presence_event();
            debug!(
                event = event.name(),
                external_id = %event.player().external_id,
                "presence change"
            );
            self.link.send(ClientMessage::presence(event));
        }
        Ok(events)
    }

    pub async fn run(mut self, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "presence poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("presence poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "presence poll failed, skipping cycle");
                    }
                }
            }
        }
    }
}
