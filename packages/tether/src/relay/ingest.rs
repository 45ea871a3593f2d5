//! Event ingestion from the polling script.
//!
//! Chat lines and game events arrive here and leave immediately as control
//! channel `event` messages, enriched with whatever the directory knows about
//! the player.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::{Value, json};
use tether_core::{PlayerDirectory, PlayerRecord};
use tracing::{debug, warn};

use super::RelayState;
use crate::control::ClientMessage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIngest {
    pub player_name: String,
    pub message: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventIngest {
    pub event: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub secondary_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl EventIngest {
    /// A full identity, if the event carries one.
    fn record(&self) -> Option<PlayerRecord> {
        let external_id = self.external_id.as_deref().filter(|s| !s.is_empty())?;
        let name = self.player_name.as_deref().filter(|s| !s.is_empty())?;
        let record = PlayerRecord::new(external_id, name);
        Some(match self.secondary_id.as_deref() {
            Some(secondary) if !secondary.is_empty() => record.with_secondary_id(secondary),
            _ => record,
        })
    }
}

fn resolve(
    directory: &PlayerDirectory,
    external_id: Option<&str>,
    name: Option<&str>,
) -> Option<PlayerRecord> {
    external_id
        .and_then(|id| directory.lookup(id))
        .or_else(|| name.and_then(|n| directory.lookup_by_name(n)))
        .cloned()
}

fn forward(state: &RelayState, event: String, data: Value) -> (StatusCode, Json<Value>) {
    state.ctx.metrics.event_ingested();
    let kind = event.clone();
    let sent = state.link.send(ClientMessage::Event { event, data });
    if sent {
        debug!(event = %kind, "ingested event forwarded");
    } else {
        warn!(event = %kind, "control channel not ready, ingested event dropped");
    }
    (StatusCode::ACCEPTED, Json(json!({ "sent": sent })))
}

pub async fn chat_handler(
    State(state): State<RelayState>,
    Json(chat): Json<ChatIngest>,
) -> impl IntoResponse {
    let player = {
        let directory = state.ctx.directory.read().await;
        resolve(
            &directory,
            chat.external_id.as_deref(),
            Some(chat.player_name.as_str()),
        )
    };
    if player.is_none() {
        debug!(player_name = %chat.player_name, "chat from a player not in the directory");
    }

    forward(
        &state,
        "chat".to_string(),
        json!({
            "playerName": chat.player_name,
            "message": chat.message,
            "player": player,
        }),
    )
}

pub async fn event_handler(
    State(state): State<RelayState>,
    Json(ingest): Json<EventIngest>,
) -> impl IntoResponse {
    let player = {
        let mut directory = state.ctx.directory.write().await;
        if let Some(record) = ingest.record() {
            directory.upsert(record);
        }
        resolve(
            &directory,
            ingest.external_id.as_deref(),
            ingest.player_name.as_deref(),
        )
    };

    forward(
        &state,
        ingest.event,
        json!({ "player": player, "data": ingest.data }),
    )
}
