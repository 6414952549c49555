//! Side-channel wire format.
//!
//! Envelopes are serialized as flat JSON objects tagged by `type`:
//!
//! ```json
//! {"type":"emotion_update","emotion":"TALKING","timestamp":1732872000.25}
//! {"type":"tool_call","tool":"check_in","name":"Ada","timestamp":1732872001.5}
//! ```

use crate::emotion::EmotionState;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

/// Topic carrying `emotion_update` envelopes.
pub const EMOTION_TOPIC: &str = "emotion";
/// Topic carrying `tool_call` envelopes.
pub const TOOL_CALLS_TOPIC: &str = "tool_calls";

/// A message published on the side channel.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    EmotionUpdate {
        emotion: EmotionState,
        timestamp: f64,
    },
    ToolCall {
        tool: String,
        /// Parameters collected by the engine, flattened next to `tool`.
        #[serde(flatten)]
        params: BTreeMap<String, String>,
        timestamp: f64,
    },
}

impl Envelope {
    pub fn emotion(emotion: EmotionState) -> Self {
        Envelope::EmotionUpdate {
            emotion,
            timestamp: now_seconds(),
        }
    }

    pub fn tool_call(tool: impl Into<String>, params: BTreeMap<String, String>) -> Self {
        Envelope::ToolCall {
            tool: tool.into(),
            params,
            timestamp: now_seconds(),
        }
    }

    /// The logical topic this envelope is routed on.
    pub fn topic(&self) -> &'static str {
        match self {
            Envelope::EmotionUpdate { .. } => EMOTION_TOPIC,
            Envelope::ToolCall { .. } => TOOL_CALLS_TOPIC,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Wall-clock time as float seconds since the Unix epoch.
fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_emotion_update_wire_format() {
        let envelope = Envelope::emotion(EmotionState::Listening);
        assert_eq!(envelope.topic(), "emotion");

        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "emotion_update");
        assert_eq!(value["emotion"], "LISTENING");
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_tool_call_flattens_params() {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), "Ada".to_string());
        let envelope = Envelope::tool_call("check_in", params);
        assert_eq!(envelope.topic(), "tool_calls");

        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["tool"], "check_in");
        assert_eq!(value["name"], "Ada");
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_tool_call_without_params_has_no_name() {
        let envelope = Envelope::tool_call("show_map", BTreeMap::new());
        let value: Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(value["tool"], "show_map");
        assert!(value.get("name").is_none());
    }
}
