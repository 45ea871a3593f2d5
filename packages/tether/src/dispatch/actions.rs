//! The closed action table: every request the platform may send, with its
//! argument type and its response shape.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tether_core::{LookupOutcome, TeleportCommand, TeleportTarget};
use tracing::{debug, info};
use uuid::Uuid;

use super::HandlerError;
use crate::context::BridgeContext;
use crate::game_api::GamePlayer;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerArgs {
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationArgs {
    pub player_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleportArgs {
    pub player_id: String,
    #[serde(flatten)]
    pub target: TeleportTarget,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandArgs {
    pub command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopArgs {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub delay_seconds: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

const DEFAULT_SHUTDOWN_DELAY_SECS: u32 = 10;
const DEFAULT_SHUTDOWN_MESSAGE: &str = "Server is shutting down";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    IsReachable,
    ListPlayers,
    ExecuteCommand(CommandArgs),
    KickPlayer(ModerationArgs),
    BanPlayer(ModerationArgs),
    UnbanPlayer(PlayerArgs),
    TeleportPlayer(TeleportArgs),
    GetPlayerLocation(PlayerArgs),
    GetPlayerInventory(PlayerArgs),
    StopServer(StopArgs),
    /// Capabilities the game API does not expose; always `[]`.
    ListBannedPlayers,
    ListWhitelistedPlayers,
    ListOperators,
}

#[derive(Deserialize)]
struct RawAction {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    args: Value,
}

impl Action {
    /// Parse `{action, args}`. Unknown action names are an error carrying the
    /// name so the caller can report it verbatim.
    pub fn parse(payload: Value) -> Result<Self, HandlerError> {
        let raw: RawAction = serde_json::from_value(payload)
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        let name = raw.action.ok_or(HandlerError::MissingAction)?;
        let args = if raw.args.is_null() {
            Value::Object(Default::default())
        } else {
            raw.args
        };

        Ok(match name.as_str() {
            "isReachable" => Self::IsReachable,
            "listPlayers" => Self::ListPlayers,
            "executeCommand" => Self::ExecuteCommand(parse_args(&name, args)?),
            "kickPlayer" => Self::KickPlayer(parse_args(&name, args)?),
            "banPlayer" => Self::BanPlayer(parse_args(&name, args)?),
            "unbanPlayer" => Self::UnbanPlayer(parse_args(&name, args)?),
            "teleportPlayer" => Self::TeleportPlayer(parse_args(&name, args)?),
            "getPlayerLocation" => Self::GetPlayerLocation(parse_args(&name, args)?),
            "getPlayerInventory" => Self::GetPlayerInventory(parse_args(&name, args)?),
            "stopServer" => Self::StopServer(parse_args(&name, args)?),
            "listBannedPlayers" => Self::ListBannedPlayers,
            "listWhitelistedPlayers" => Self::ListWhitelistedPlayers,
            "listOperators" => Self::ListOperators,
            _ => return Err(HandlerError::UnknownAction(name)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IsReachable => "isReachable",
            Self::ListPlayers => "listPlayers",
            Self::ExecuteCommand(_) => "executeCommand",
            Self::KickPlayer(_) => "kickPlayer",
            Self::BanPlayer(_) => "banPlayer",
            Self::UnbanPlayer(_) => "unbanPlayer",
            Self::TeleportPlayer(_) => "teleportPlayer",
            Self::GetPlayerLocation(_) => "getPlayerLocation",
            Self::GetPlayerInventory(_) => "getPlayerInventory",
            Self::StopServer(_) => "stopServer",
            Self::ListBannedPlayers => "listBannedPlayers",
            Self::ListWhitelistedPlayers => "listWhitelistedPlayers",
            Self::ListOperators => "listOperators",
        }
    }

    pub async fn execute(self, ctx: &BridgeContext) -> Result<Value, HandlerError> {
        match self {
            Self::IsReachable => Ok(is_reachable(ctx).await),
            Self::ListPlayers => list_players(ctx).await,
            Self::ExecuteCommand(args) => execute_command(ctx, &args.command).await,
            Self::KickPlayer(args) => {
                let reason = args.reason.as_deref().unwrap_or("Kicked by an administrator");
                ctx.game.kick(&args.player_id, reason).await?;
                info!(player_id = %args.player_id, "player kicked");
                Ok(ack())
            }
            Self::BanPlayer(args) => {
                let reason = args.reason.as_deref().unwrap_or("Banned by an administrator");
                ctx.game.ban(&args.player_id, reason).await?;
                info!(player_id = %args.player_id, "player banned");
                Ok(ack())
            }
            Self::UnbanPlayer(args) => {
                ctx.game.unban(&args.player_id).await?;
                info!(player_id = %args.player_id, "player unbanned");
                Ok(ack())
            }
            Self::TeleportPlayer(args) => {
                let queued = ctx
                    .teleports
                    .push(TeleportCommand::new(args.player_id, args.target));
                ctx.metrics.teleport_enqueued();
                debug!(queued, "teleport enqueued");
                // Optimistic: the script applies it on its next tick, or never
                Ok(ack())
            }
            Self::GetPlayerLocation(args) => Ok(lookup(ctx, LookupKind::Location, args).await),
            Self::GetPlayerInventory(args) => Ok(lookup(ctx, LookupKind::Inventory, args).await),
            Self::StopServer(args) => stop_server(ctx, args).await,
            Self::ListBannedPlayers | Self::ListWhitelistedPlayers | Self::ListOperators => {
                Ok(json!([]))
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(action: &str, args: Value) -> Result<T, HandlerError> {
    serde_json::from_value(args).map_err(|e| HandlerError::InvalidArgs {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

fn ack() -> Value {
    json!({ "success": true })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSummary {
    id: String,
    name: String,
    player_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ping: Option<f64>,
}

impl From<&GamePlayer> for PlayerSummary {
    fn from(p: &GamePlayer) -> Self {
        Self {
            id: p.user_id.clone(),
            name: p.name.clone(),
            player_id: p.player_id.clone(),
            level: p.level,
            ping: p.ping,
        }
    }
}

async fn is_reachable(ctx: &BridgeContext) -> Value {
    match ctx.game.info().await {
        Ok(info) => json!({ "reachable": true, "info": info }),
        Err(e) => {
            debug!(error = %e, "game server not reachable");
            json!({ "reachable": false })
        }
    }
}

async fn list_players(ctx: &BridgeContext) -> Result<Value, HandlerError> {
    let players = ctx.game.players().await?;
    {
        let mut directory = ctx.directory.write().await;
        for p in &players {
            directory.upsert(p.record());
        }
    }
    let summaries: Vec<PlayerSummary> = players.iter().map(PlayerSummary::from).collect();
    Ok(serde_json::to_value(summaries).unwrap_or_else(|_| json!([])))
}

/// Admin console commands the REST API can express.
#[derive(Debug, Clone, PartialEq)]
pub enum GameCommand {
    Save,
    Announce(String),
    Shutdown { wait_secs: u32, message: String },
}

impl FromStr for GameCommand {
    type Err = HandlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('/');
        let (verb, rest) = match s.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (s, ""),
        };
        match verb.to_ascii_lowercase().as_str() {
            "save" => Ok(Self::Save),
            "announce" | "broadcast" if rest.is_empty() => Err(HandlerError::InvalidArgs {
                action: "executeCommand".into(),
                reason: format!("{verb} needs a message"),
            }),
            "announce" | "broadcast" => Ok(Self::Announce(rest.to_string())),
            "shutdown" => {
                let (first, tail) = match rest.split_once(char::is_whitespace) {
                    Some((a, b)) => (a, b.trim()),
                    None => (rest, ""),
                };
                match first.parse::<u32>() {
                    Ok(wait_secs) => Ok(Self::Shutdown {
                        wait_secs,
                        message: non_empty_or(tail, DEFAULT_SHUTDOWN_MESSAGE),
                    }),
                    Err(_) => Ok(Self::Shutdown {
                        wait_secs: DEFAULT_SHUTDOWN_DELAY_SECS,
                        message: non_empty_or(rest, DEFAULT_SHUTDOWN_MESSAGE),
                    }),
                }
            }
            _ => Err(HandlerError::UnsupportedCommand(s.to_string())),
        }
    }
}

fn non_empty_or(s: &str, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}

async fn execute_command(ctx: &BridgeContext, command: &str) -> Result<Value, HandlerError> {
    match command.parse::<GameCommand>()? {
        GameCommand::Save => ctx.game.save().await?,
        GameCommand::Announce(message) => ctx.game.announce(&message).await?,
        GameCommand::Shutdown { wait_secs, message } => {
            ctx.game.shutdown(wait_secs, &message).await?
        }
    }
    Ok(ack())
}

async fn stop_server(ctx: &BridgeContext, args: StopArgs) -> Result<Value, HandlerError> {
    if args.force {
        info!("force-stopping game server");
        ctx.game.force_stop().await?;
    } else {
        let wait_secs = args.delay_seconds.unwrap_or(DEFAULT_SHUTDOWN_DELAY_SECS);
        let message = args.message.as_deref().unwrap_or(DEFAULT_SHUTDOWN_MESSAGE);
        info!(wait_secs, "shutting down game server");
        ctx.game.shutdown(wait_secs, message).await?;
    }
    Ok(ack())
}

#[derive(Debug, Clone, Copy)]
enum LookupKind {
    Location,
    Inventory,
}

impl LookupKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Location => "loc",
            Self::Inventory => "inv",
        }
    }
}

/// Run a correlated lookup and map its outcome onto a response payload.
///
/// Busy and timed-out lookups answer with the `{"unknown": true}` sentinel.
async fn lookup(ctx: &BridgeContext, kind: LookupKind, args: PlayerArgs) -> Value {
    let queue = match kind {
        LookupKind::Location => &ctx.locations,
        LookupKind::Inventory => &ctx.inventories,
    };
    let request_id = format!("{}_{}", kind.prefix(), Uuid::new_v4().simple());
    ctx.metrics.lookup_started();

    match queue.lookup(request_id, args.player_id).await {
        LookupOutcome::Found(payload) => payload,
        LookupOutcome::Busy => {
            ctx.metrics.lookup_busy();
            json!({ "unknown": true, "reason": "inFlight" })
        }
        LookupOutcome::TimedOut => {
            ctx.metrics.lookup_timed_out();
            json!({ "unknown": true, "reason": "timeout" })
        }
    }
}
