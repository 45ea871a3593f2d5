use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tether_core::Backoff;

// =============================================================================
// Unified config (figment-deserialized from defaults / tether.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   tether.toml:     [control]
//                    identity_token = "..."
//
//   env var:         TETHER_CONTROL__IDENTITY_TOKEN=...   (double underscore = nesting)

/// Top-level configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub control: ControlFileConfig,
    #[serde(default)]
    pub game: GameFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub presence: PresenceFileConfig,
}

/// Control channel settings (lives under `[control]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlFileConfig {
    /// WebSocket URL of the management platform.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub identity_token: String,
    /// Only needed the first time a server registers with the platform.
    #[serde(default)]
    pub registration_token: Option<String>,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Upper bound on the TCP, TLS and WebSocket handshake of one attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ControlFileConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            identity_token: String::new(),
            registration_token: None,
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Game REST admin API (lives under `[game]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameFileConfig {
    #[serde(default = "default_game_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default = "default_game_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GameFileConfig {
    fn default() -> Self {
        Self {
            api_url: default_game_api_url(),
            admin_password: String::new(),
            request_timeout_secs: default_game_request_timeout_secs(),
        }
    }
}

/// Local relay consumed by the embedded script (lives under `[relay]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_relay_host")]
    pub host: String,
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_relay_port(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

/// Presence polling (lives under `[presence]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresenceFileConfig {
    #[serde(default = "default_presence_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for PresenceFileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_presence_poll_interval_secs(),
        }
    }
}

fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_game_api_url() -> String {
    "http://127.0.0.1:8212".to_string()
}
fn default_game_request_timeout_secs() -> u64 {
    10
}
fn default_relay_host() -> String {
    "127.0.0.1".to_string()
}
fn default_relay_port() -> u16 {
    8787
}
fn default_lookup_timeout_ms() -> u64 {
    5000
}
fn default_presence_poll_interval_secs() -> u64 {
    10
}

/// Build a figment that layers: defaults → config file → TETHER_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TETHER_CONTROL__URL=wss://...`  →  `control.url = "wss://..."`
///   `TETHER_RELAY__PORT=9000`        →  `relay.port = 9000`
pub fn load_config(path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TETHER_").split("__"))
}

impl FileConfig {
    /// Reject configurations that cannot possibly connect.
    ///
    /// Called before any connection attempt; a failure here ends the process.
    pub fn validate(&self) -> Result<()> {
        if self.control.url.trim().is_empty() {
            bail!("control.url is required (set TETHER_CONTROL__URL)");
        }
        if !self.control.url.starts_with("ws://") && !self.control.url.starts_with("wss://") {
            bail!("control.url must be a ws:// or wss:// URL");
        }
        if self.control.identity_token.trim().is_empty() {
            bail!("control.identity_token is required (set TETHER_CONTROL__IDENTITY_TOKEN)");
        }
        if self.game.api_url.trim().is_empty() {
            bail!("game.api_url must not be empty");
        }
        if self.control.connect_timeout_secs == 0 {
            bail!("control.connect_timeout_secs must be at least 1");
        }
        if self.presence.poll_interval_secs == 0 {
            bail!("presence.poll_interval_secs must be at least 1");
        }
        Ok(())
    }
}

impl ControlFileConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_base_ms)),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl GameFileConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RelayFileConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse::<SocketAddr>()?)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl PresenceFileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
