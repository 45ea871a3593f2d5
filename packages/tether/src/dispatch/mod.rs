//! Request dispatch
//!
//! Every `request` from the control channel is routed here and answered with
//! exactly one `response` carrying the same request id. Handler failures, bad
//! arguments, unknown actions and panics all become an `{"error": ...}`
//! payload; nothing escapes to the channel.

pub mod actions;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::context::BridgeContext;
use crate::control::ClientMessage;
use crate::game_api::GameApiError;

use actions::Action;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Request payload has no action")]
    MissingAction,

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid arguments for {action}: {reason}")]
    InvalidArgs { action: String, reason: String },

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error(transparent)]
    Game(#[from] GameApiError),
}

pub struct Dispatcher {
    ctx: Arc<BridgeContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Handle one request and build its response.
    pub async fn dispatch(&self, request_id: String, payload: Value) -> ClientMessage {
        self.ctx.metrics.request_received();

        let outcome = AssertUnwindSafe(self.handle(payload)).catch_unwind().await;
        let payload = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.ctx.metrics.request_error();
                warn!(request_id = %request_id, error = %e, "request failed");
                json!({ "error": e.to_string() })
            }
            Err(_) => {
                self.ctx.metrics.request_error();
                error!(request_id = %request_id, "request handler panicked");
                json!({ "error": "Internal error" })
            }
        };

        ClientMessage::Response {
            request_id,
            payload,
        }
    }

    async fn handle(&self, payload: Value) -> Result<Value, HandlerError> {
        let action = Action::parse(payload)?;
        debug!(action = action.name(), "dispatching");
        action.execute(&self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeGameApi, test_context};
    use std::time::Duration;

    fn payload_of(msg: ClientMessage) -> (String, Value) {
        match msg {
            ClientMessage::Response {
                request_id,
                payload,
            } => (request_id, payload),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_gets_error_response() {
        let (ctx, _game) = test_context(Duration::from_millis(100));
        let dispatcher = Dispatcher::new(ctx.clone());

        let (id, payload) = payload_of(
            dispatcher
                .dispatch("r-1".into(), json!({"action": "doTheThing"}))
                .await,
        );
        assert_eq!(id, "r-1");
        assert_eq!(payload, json!({"error": "Unknown action: doTheThing"}));
        assert_eq!(ctx.metrics.snapshot().requests.errors, 1);
    }

    #[tokio::test]
    async fn test_stub_actions_return_empty_list() {
        let (ctx, game) = test_context(Duration::from_millis(100));
        let dispatcher = Dispatcher::new(ctx);

        for action in ["listBannedPlayers", "listWhitelistedPlayers", "listOperators"] {
            let (_, payload) = payload_of(
                dispatcher
                    .dispatch("r".into(), json!({"action": action, "args": {}}))
                    .await,
            );
            assert_eq!(payload, json!([]));
        }
        assert!(game.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_players_populates_directory() {
        let (ctx, game) = test_context(Duration::from_millis(100));
        game.set_players(vec![FakeGameApi::player("steam_1", "Aria", "p-1")]);
        let dispatcher = Dispatcher::new(ctx.clone());

        let (_, payload) = payload_of(
            dispatcher
                .dispatch("r-2".into(), json!({"action": "listPlayers"}))
                .await,
        );
        assert_eq!(payload[0]["id"], "steam_1");
        assert_eq!(payload[0]["name"], "Aria");

        let directory = ctx.directory.read().await;
        assert_eq!(directory.lookup("steam_1").unwrap().display_name, "Aria");
    }

    #[tokio::test]
    async fn test_game_failure_becomes_error_payload() {
        let (ctx, game) = test_context(Duration::from_millis(100));
        game.set_failing(true);
        let dispatcher = Dispatcher::new(ctx);

        let (_, payload) = payload_of(
            dispatcher
                .dispatch(
                    "r-3".into(),
                    json!({"action": "kickPlayer", "args": {"playerId": "steam_1"}}),
                )
                .await,
        );
        assert!(payload["error"].as_str().unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_moderation_and_commands_reach_game_api() {
        let (ctx, game) = test_context(Duration::from_millis(100));
        let dispatcher = Dispatcher::new(ctx);

        dispatcher
            .dispatch(
                "a".into(),
                json!({"action": "banPlayer", "args": {"playerId": "steam_9", "reason": "griefing"}}),
            )
            .await;
        dispatcher
            .dispatch(
                "b".into(),
                json!({"action": "executeCommand", "args": {"command": "announce hello all"}}),
            )
            .await;
        dispatcher
            .dispatch(
                "c".into(),
                json!({"action": "stopServer", "args": {"delaySeconds": 60}}),
            )
            .await;
        let (_, payload) = payload_of(
            dispatcher
                .dispatch(
                    "d".into(),
                    json!({"action": "executeCommand", "args": {"command": "spawn dragon"}}),
                )
                .await,
        );
        assert!(payload["error"].as_str().unwrap().starts_with("Unsupported command"));

        assert_eq!(
            game.calls(),
            vec![
                "ban steam_9 griefing".to_string(),
                "announce hello all".to_string(),
                "shutdown 60 Server is shutting down".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_teleport_is_acknowledged_and_queued() {
        let (ctx, _game) = test_context(Duration::from_millis(100));
        let dispatcher = Dispatcher::new(ctx.clone());

        let (_, payload) = payload_of(
            dispatcher
                .dispatch(
                    "t".into(),
                    json!({"action": "teleportPlayer", "args": {"playerId": "steam_1", "targetPlayerId": "steam_2"}}),
                )
                .await,
        );
        assert_eq!(payload, json!({"success": true}));
        let queued = ctx.teleports.pop_all();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].subject_id, "steam_1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_location_timeout_sentinel() {
        let (ctx, _game) = test_context(Duration::from_secs(5));
        let dispatcher = Dispatcher::new(ctx.clone());

        let (_, payload) = payload_of(
            dispatcher
                .dispatch(
                    "l".into(),
                    json!({"action": "getPlayerLocation", "args": {"playerId": "steam_1"}}),
                )
                .await,
        );
        assert_eq!(payload, json!({"unknown": true, "reason": "timeout"}));
        assert_eq!(ctx.locations.pending_len(), 0);
        assert_eq!(ctx.metrics.snapshot().queues.lookup_timeouts, 1);
    }

    #[tokio::test]
    async fn test_location_answered_by_script() {
        let (ctx, _game) = test_context(Duration::from_secs(5));
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));

        let d = dispatcher.clone();
        let task = tokio::spawn(async move {
            d.dispatch(
                "l".into(),
                json!({"action": "getPlayerLocation", "args": {"playerId": "steam_1"}}),
            )
            .await
        });

        // Wait for the pending entry, then answer as the script would
        let pending = loop {
            let pending = ctx.locations.pending();
            if let Some(p) = pending.into_iter().next() {
                break p;
            }
            tokio::task::yield_now().await;
        };
        assert!(pending.request_id.starts_with("loc_"));
        ctx.locations
            .respond(&pending.request_id, json!({"x": 1.0, "y": 2.0, "z": 3.0}))
            .unwrap();

        let (_, payload) = payload_of(task.await.unwrap());
        assert_eq!(payload, json!({"x": 1.0, "y": 2.0, "z": 3.0}));
    }

    #[tokio::test]
    async fn test_handler_panic_gets_error_response() {
        let (ctx, game) = test_context(Duration::from_millis(100));
        game.set_panicking(true);
        let dispatcher = Dispatcher::new(ctx.clone());

        let (id, payload) = payload_of(
            dispatcher
                .dispatch("p-1".into(), json!({"action": "listPlayers"}))
                .await,
        );
        assert_eq!(id, "p-1");
        assert_eq!(payload, json!({"error": "Internal error"}));
        assert_eq!(ctx.metrics.snapshot().requests.errors, 1);

        // The dispatcher keeps serving after a panic
        game.set_panicking(false);
        let (_, payload) = payload_of(
            dispatcher
                .dispatch("p-2".into(), json!({"action": "listPlayers"}))
                .await,
        );
        assert_eq!(payload, json!([]));
    }

    #[tokio::test]
    async fn test_bare_announce_is_invalid_args() {
        let (ctx, game) = test_context(Duration::from_millis(100));
        let dispatcher = Dispatcher::new(ctx);

        let (_, payload) = payload_of(
            dispatcher
                .dispatch(
                    "a".into(),
                    json!({"action": "executeCommand", "args": {"command": "announce"}}),
                )
                .await,
        );
        assert_eq!(
            payload,
            json!({"error": "Invalid arguments for executeCommand: announce needs a message"})
        );
        assert!(game.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_location_lookup_for_same_player_is_busy() {
        let (ctx, _game) = test_context(Duration::from_secs(5));
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));

        let d = dispatcher.clone();
        let first = tokio::spawn(async move {
            d.dispatch(
                "l-1".into(),
                json!({"action": "getPlayerLocation", "args": {"playerId": "steam_1"}}),
            )
            .await
        });
        while ctx.locations.pending_len() == 0 {
            tokio::task::yield_now().await;
        }

        let (id, payload) = payload_of(
            dispatcher
                .dispatch(
                    "l-2".into(),
                    json!({"action": "getPlayerLocation", "args": {"playerId": "steam_1"}}),
                )
                .await,
        );
        assert_eq!(id, "l-2");
        assert_eq!(payload, json!({"unknown": true, "reason": "inFlight"}));
        assert_eq!(ctx.metrics.snapshot().queues.lookups_busy, 1);
        assert_eq!(ctx.locations.pending_len(), 1);

        let pending = ctx.locations.pending().remove(0);
        ctx.locations
            .respond(&pending.request_id, json!({"x": 4.0, "y": 5.0, "z": 6.0}))
            .unwrap();
        let (id, payload) = payload_of(first.await.unwrap());
        assert_eq!(id, "l-1");
        assert_eq!(payload, json!({"x": 4.0, "y": 5.0, "z": 6.0}));
    }
}
