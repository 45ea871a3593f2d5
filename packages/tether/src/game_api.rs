//! Client for the game server's REST admin API.
//!
//! The bridge treats the game server as a black box behind [`GameApi`];
//! [`RestGameApi`] is the production implementation, tests substitute a fake.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tether_core::PlayerRecord;
use tracing::debug;

const ADMIN_USER: &str = "admin";

#[derive(Debug, thiserror::Error)]
pub enum GameApiError {
    #[error("game server is unreachable: {0}")]
    Unreachable(String),

    #[error("game server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from game server: {0}")]
    InvalidResponse(String),
}

impl GameApiError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub servername: String,
    #[serde(default)]
    pub description: String,
}

/// One row of the game's player list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePlayer {
    pub name: String,
    #[serde(default)]
    pub account_name: Option<String>,
    pub player_id: String,
    pub user_id: String,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub ping: Option<f64>,
}

impl GamePlayer {
    /// Directory identity: the platform user id is the stable key.
    pub fn record(&self) -> PlayerRecord {
        PlayerRecord::new(&self.user_id, &self.name).with_secondary_id(&self.player_id)
    }
}

#[derive(Deserialize)]
struct PlayersEnvelope {
    #[serde(default)]
    players: Vec<GamePlayer>,
}

#[async_trait]
pub trait GameApi: Send + Sync {
    async fn info(&self) -> Result<ServerInfo, GameApiError>;
    async fn players(&self) -> Result<Vec<GamePlayer>, GameApiError>;
    async fn announce(&self, message: &str) -> Result<(), GameApiError>;
    async fn kick(&self, user_id: &str, message: &str) -> Result<(), GameApiError>;
    async fn ban(&self, user_id: &str, message: &str) -> Result<(), GameApiError>;
    async fn unban(&self, user_id: &str) -> Result<(), GameApiError>;
    async fn save(&self) -> Result<(), GameApiError>;
    async fn shutdown(&self, wait_secs: u32, message: &str) -> Result<(), GameApiError>;
    async fn force_stop(&self) -> Result<(), GameApiError>;
}

/// `GameApi` over HTTP with basic auth.
pub struct RestGameApi {
    client: reqwest::Client,
    base_url: String,
    password: String,
}

impl RestGameApi {
    pub fn new(base_url: &str, password: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build game API HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            password: password.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/api/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GameApiError> {
        debug!(path, "game API GET");
        let resp = self
            .client
            .get(self.url(path))
            .basic_auth(ADMIN_USER, Some(&self.password))
            .send()
            .await
            .map_err(GameApiError::from_reqwest)?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| GameApiError::InvalidResponse(e.to_string()))
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<(), GameApiError> {
        debug!(path, "game API POST");
        let mut req = self
            .client
            .post(self.url(path))
            .basic_auth(ADMIN_USER, Some(&self.password));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(GameApiError::from_reqwest)?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GameApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(GameApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl GameApi for RestGameApi {
    async fn info(&self) -> Result<ServerInfo, GameApiError> {
        self.get_json("info").await
    }

    async fn players(&self) -> Result<Vec<GamePlayer>, GameApiError> {
        let envelope: PlayersEnvelope = self.get_json("players").await?;
        Ok(envelope.players)
    }

    async fn announce(&self, message: &str) -> Result<(), GameApiError> {
        self.post("announce", Some(json!({ "message": message })))
            .await
    }

    async fn kick(&self, user_id: &str, message: &str) -> Result<(), GameApiError> {
        self.post("kick", Some(json!({ "userid": user_id, "message": message })))
            .await
    }

    async fn ban(&self, user_id: &str, message: &str) -> Result<(), GameApiError> {
        self.post("ban", Some(json!({ "userid": user_id, "message": message })))
            .await
    }

    async fn unban(&self, user_id: &str) -> Result<(), GameApiError> {
        self.post("unban", Some(json!({ "userid": user_id })))
            .await
    }

    async fn save(&self) -> Result<(), GameApiError> {
        self.post("save", None).await
    }

    async fn shutdown(&self, wait_secs: u32, message: &str) -> Result<(), GameApiError> {
        self.post(
            "shutdown",
            Some(json!({ "waittime": wait_secs, "message": message })),
        )
        .await
    }

    async fn force_stop(&self) -> Result<(), GameApiError> {
        self.post("stop", None).await
    }
}
