//! Local relay: the HTTP surface the in-game polling script talks to.
//!
//! Same-host only, no authentication. The script drains teleports, reads the
//! pending lookup lists, posts lookup answers, and pushes chat and game events
//! that the bridge forwards over the control channel.

pub mod health;
pub mod ingest;
pub mod queues;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::context::BridgeContext;
use crate::control::ControlLink;

#[derive(Clone)]
pub struct RelayState {
    pub ctx: Arc<BridgeContext>,
    pub link: Arc<dyn ControlLink>,
}

impl RelayState {
    pub fn new(ctx: Arc<BridgeContext>, link: Arc<dyn ControlLink>) -> Self {
        Self { ctx, link }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/teleport-queue", get(queues::teleport_queue_handler))
        .route("/location-queue", get(queues::location_queue_handler))
        .route("/location-response", post(queues::location_response_handler))
        .route("/inventory-queue", get(queues::inventory_queue_handler))
        .route("/inventory-response", post(queues::inventory_response_handler))
        .route("/ingest/chat", post(ingest::chat_handler))
        .route("/ingest/event", post(ingest::event_handler))
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::health_live_handler))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}
