//! Control Channel Protocol Types
//!
//! JSON envelopes exchanged with the management platform, discriminated by a
//! `type` tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::PresenceEvent;

/// Messages sent FROM the management platform TO the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Answer to our `identify`. A non-null `error` means we were refused.
    IdentifyResponse {
        #[serde(default)]
        error: Option<Value>,
    },

    ConnectionConfirmed,

    Request {
        request_id: String,
        /// `{action, args}`; validated by the dispatcher, not here, so a bad
        /// payload still gets a response.
        #[serde(default)]
        payload: Value,
    },

    Ping,

    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<String>,
    },

    /// Any `type` we don't know about.
    #[serde(other)]
    Unknown,
}

/// Messages sent FROM the bridge TO the management platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Identify {
        identity_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        registration_token: Option<String>,
    },

    Response {
        request_id: String,
        payload: Value,
    },

    Pong,

    /// Unsolicited notification (presence changes, ingested game events).
    Event { event: String, data: Value },
}

impl ClientMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Response { .. } => "response",
            Self::Pong => "pong",
            Self::Event { .. } => "event",
        }
    }

    pub fn presence(event: &PresenceEvent) -> Self {
        Self::Event {
            event: event.name().to_string(),
            data: serde_json::to_value(event.player()).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn parse_server_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
