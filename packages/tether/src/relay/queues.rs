use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};
use tether_core::{CorrelatedQueue, QueueError};
use tracing::{debug, warn};

use super::RelayState;
use crate::metrics::BridgeMetrics;

/// Drain every queued teleport. A second poll with nothing enqueued in
/// between returns an empty list.
pub async fn teleport_queue_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let items = state.ctx.teleports.pop_all();
    if !items.is_empty() {
        debug!(count = items.len(), "teleports drained");
    }
    Json(json!({ "items": items }))
}

/// Pending location lookups. Reading does not consume them.
pub async fn location_queue_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({ "requests": state.ctx.locations.pending() }))
}

pub async fn location_response_handler(
    State(state): State<RelayState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    accept_response(&state.ctx.locations, &state.ctx.metrics, "location", body)
}

pub async fn inventory_queue_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({ "requests": state.ctx.inventories.pending() }))
}

pub async fn inventory_response_handler(
    State(state): State<RelayState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    accept_response(&state.ctx.inventories, &state.ctx.metrics, "inventory", body)
}

/// Split a posted answer into its request id and payload.
///
/// The script may send `{requestId, payload}` or put the result fields next
/// to `requestId` at the top level.
fn split_response(body: Value) -> Result<(String, Value), QueueError> {
    let Value::Object(mut fields) = body else {
        return Err(QueueError::MissingRequestId);
    };
    let request_id = match fields.remove("requestId") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return Err(QueueError::MissingRequestId),
    };
    let payload = match fields.remove("payload") {
        Some(payload) if fields.is_empty() => payload,
        Some(payload) => {
            fields.insert("payload".into(), payload);
            Value::Object(fields)
        }
        None => Value::Object(fields),
    };
    Ok((request_id, payload))
}

fn accept_response(
    queue: &CorrelatedQueue,
    metrics: &BridgeMetrics,
    kind: &'static str,
    body: Value,
) -> (StatusCode, Json<Value>) {
    let result = split_response(body)
        .and_then(|(request_id, payload)| queue.respond(&request_id, payload).map(|()| request_id));

    match result {
        Ok(request_id) => {
            debug!(kind, request_id = %request_id, "lookup response accepted");
            (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
        }
        Err(e) => {
            metrics.response_rejected();
            warn!(kind, error = %e, "dropping lookup response");
            let status = match e {
                QueueError::UnknownRequest(_) => StatusCode::NOT_FOUND,
                QueueError::DuplicateResponse(_) => StatusCode::CONFLICT,
                QueueError::MissingRequestId => StatusCode::BAD_REQUEST,
            };
            (
                status,
                Json(json!({ "accepted": false, "error": e.to_string() })),
            )
        }
    }
}
