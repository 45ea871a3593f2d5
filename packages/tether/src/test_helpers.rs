use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::ConnectionState;

use crate::context::BridgeContext;
use crate::control::{ClientMessage, ControlLink};
use crate::game_api::{GameApi, GameApiError, GamePlayer, ServerInfo};
use crate::metrics::BridgeMetrics;

/// In-memory `GameApi` that records every mutating call as a short string.
#[derive(Default)]
pub struct FakeGameApi {
    players: Mutex<Vec<GamePlayer>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<bool>,
    panicking: Mutex<bool>,
}

impl FakeGameApi {
    pub fn player(user_id: &str, name: &str, player_id: &str) -> GamePlayer {
        GamePlayer {
            name: name.to_string(),
            account_name: None,
            player_id: player_id.to_string(),
            user_id: user_id.to_string(),
            level: Some(1),
            ping: None,
        }
    }

    pub fn set_players(&self, players: Vec<GamePlayer>) {
        *self.players.lock().unwrap() = players;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Make every call panic instead of returning.
    pub fn set_panicking(&self, panicking: bool) {
        *self.panicking.lock().unwrap() = panicking;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), GameApiError> {
        if *self.panicking.lock().unwrap() {
            panic!("fake game API panicked");
        }
        if *self.failing.lock().unwrap() {
            return Err(GameApiError::Unreachable("connection refused".into()));
        }
        Ok(())
    }

    fn record(&self, call: String) -> Result<(), GameApiError> {
        self.check()?;
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl GameApi for FakeGameApi {
    async fn info(&self) -> Result<ServerInfo, GameApiError> {
        self.check()?;
        Ok(ServerInfo {
            version: "test".into(),
            servername: "Fake".into(),
            description: String::new(),
        })
    }

    async fn players(&self) -> Result<Vec<GamePlayer>, GameApiError> {
        self.check()?;
        Ok(self.players.lock().unwrap().clone())
    }

    async fn announce(&self, message: &str) -> Result<(), GameApiError> {
        self.record(format!("announce {message}"))
    }

    async fn kick(&self, user_id: &str, message: &str) -> Result<(), GameApiError> {
        self.record(format!("kick {user_id} {message}"))
    }

    async fn ban(&self, user_id: &str, message: &str) -> Result<(), GameApiError> {
        self.record(format!("ban {user_id} {message}"))
    }

    async fn unban(&self, user_id: &str) -> Result<(), GameApiError> {
        self.record(format!("unban {user_id}"))
    }

    async fn save(&self) -> Result<(), GameApiError> {
        self.record("save".into())
    }

    async fn shutdown(&self, wait_secs: u32, message: &str) -> Result<(), GameApiError> {
        self.record(format!("shutdown {wait_secs} {message}"))
    }

    async fn force_stop(&self) -> Result<(), GameApiError> {
        self.record("stop".into())
    }
}

/// `ControlLink` that keeps everything it is asked to send.
pub struct RecordingLink {
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<ClientMessage>>,
}

impl RecordingLink {
    pub fn ready() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Ready),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl ControlLink for RecordingLink {
    fn send(&self, msg: ClientMessage) -> bool {
        if *self.state.lock().unwrap() != ConnectionState::Ready {
            return false;
        }
        self.sent.lock().unwrap().push(msg);
        true
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

/// Build a `BridgeContext` backed by a `FakeGameApi`.
///
/// The fake is returned alongside so tests can seed players and inspect calls.
pub fn test_context(lookup_timeout: Duration) -> (Arc<BridgeContext>, Arc<FakeGameApi>) {
    let game = Arc::new(FakeGameApi::default());
    let ctx = BridgeContext::new(game.clone(), lookup_timeout, Arc::new(BridgeMetrics::new()));
    (Arc::new(ctx), game)
}
