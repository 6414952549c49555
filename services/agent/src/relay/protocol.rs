//! Defines the WebSocket message protocol between room clients and the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from a room client (UI or media bridge) to the relay.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The identities currently speaking. An empty list means silence.
    ActiveSpeakers { speakers: Vec<String> },
}

/// Messages sent from the relay to room clients.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the connection and tells the client who it is.
    Joined { identity: String, room: String },
    /// A side-channel message published on `topic`.
    Data { topic: String, payload: Value },
}

impl ServerMessage {
    /// Wraps a published payload. JSON payloads are embedded as-is; anything
    /// else is carried as a string.
    pub fn data(topic: &str, payload: &[u8]) -> Self {
        let payload = serde_json::from_slice(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        ServerMessage::Data {
            topic: topic.to_string(),
            payload,
        }
    }
}
