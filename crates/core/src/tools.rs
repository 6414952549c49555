//! Tool Catalog and Dispatcher
//!
//! The conversational engine may call a fixed set of actions mid-conversation.
//! Each catalog entry declares how the engine should recognise it (trigger
//! description and parameter schema) and which of two handler kinds runs it:
//!
//! - **Reveal** actions publish a `tool_call` envelope so the UI can show an
//!   overlay (the venue map, a pre-filled check-in form).
//! - **Actuator** actions call the robot's control endpoint.
//!
//! Every handler returns a short sentence the engine speaks back. Nothing in
//! here fails: errors degrade to a calm fallback phrasing.

use crate::action_client::ActionClient;
use crate::envelope::Envelope;
use crate::session::SessionHandle;
use crate::side_channel::SideChannel;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A named parameter the engine must collect before calling a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolParameter {
    pub name: &'static str,
    pub description: &'static str,
}

/// Spoken replies for a reveal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealReplies {
    pub shown: &'static str,
    pub failed: &'static str,
    pub unavailable: &'static str,
}

/// Spoken replies for an actuator action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorReplies {
    pub done: &'static str,
    pub failed: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    /// Publishes a `tool_call` envelope carrying the tool name and parameters.
    Reveal(RevealReplies),
    /// Calls `endpoint` on the device-control API.
    Actuator {
        endpoint: &'static str,
        replies: ActuatorReplies,
    },
}

/// One entry of the tool catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: &'static str,
    /// Trigger description, consumed by the engine's own routing.
    pub description: &'static str,
    pub parameters: Vec<ToolParameter>,
    pub kind: ToolKind,
}

impl ToolSpec {
    /// JSON schema for the parameters, as expected by function-calling APIs.
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.to_string(),
                    json!({ "type": "string", "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self.parameters.iter().map(|p| p.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A provider-neutral description of a tool, handed to engines.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A single call from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: BTreeMap<String, String>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Builds an invocation from a JSON arguments string as sent by realtime
    /// APIs. Non-string scalars are stringified; malformed JSON yields no
    /// arguments.
    pub fn from_json_arguments(name: impl Into<String>, arguments: &str) -> Self {
        let value = serde_json::from_str::<Value>(arguments).unwrap_or(Value::Null);
        Self::from_value_arguments(name, &value)
    }

    pub fn from_value_arguments(name: impl Into<String>, arguments: &Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map
                .iter()
                .filter_map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        Value::Null => return None,
                        other => other.to_string(),
                    };
                    Some((k.clone(), v))
                })
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }
}

pub const UNKNOWN_TOOL_REPLY: &str = "Sorry, I can't do that one.";
/// Reply for actuator actions when no session is active.
pub const ACTUATOR_UNAVAILABLE_REPLY: &str = "My arm is currently unavailable.";

/// The catalog the robot ships with.
pub fn default_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "show_map",
            description: "ALWAYS call this tool when the user mentions ANY of these: map, directions, where is, find, location, navigate, looking for, bathroom, restroom, food, drinks, stage, mentor area. This displays a visual map on screen.",
            parameters: vec![],
            kind: ToolKind::Reveal(RevealReplies {
                shown: "Here is the map.",
                failed: "I couldn't display the map right now.",
                unavailable: "The map display is currently unavailable.",
            }),
        },
        ToolSpec {
            name: "check_in",
            description: "ALWAYS call this tool when the user mentions ANY of these: check in, checking in, register, sign in, arrived, attendance, here for the hackathon. First ask for their name, then call this tool with the name to show the check-in form on screen.",
            parameters: vec![ToolParameter {
                name: "name",
                description: "The name of the person checking in. Ask for this before calling the tool.",
            }],
            kind: ToolKind::Reveal(RevealReplies {
                shown: "Press check in when you're ready.",
                failed: "I couldn't open the check-in form right now.",
                unavailable: "The check-in system is currently unavailable.",
            }),
        },
        actuator(
            "robot_hello",
            "Make the robot wave hello. Use this when greeting someone, saying hello, or when someone first approaches.",
            "hello",
            "Waving hello!",
            "I tried to wave but something went wrong.",
        ),
        actuator(
            "robot_track_start",
            "Start tracking mode - the robot will follow and track the user. Use when you want to pay attention to someone or follow their movement.",
            "track_start",
            "Now tracking you.",
            "I couldn't start tracking.",
        ),
        actuator(
            "robot_track_stop",
            "Stop tracking mode - the robot stops following the user. Use when ending a conversation or when the user is leaving.",
            "track_stop",
            "Stopped tracking.",
            "I couldn't stop tracking.",
        ),
        actuator(
            "robot_forward",
            "Move the robot forward/lean in. Use when showing interest, getting closer to see something, or emphasizing a point.",
            "forward",
            "Leaning in.",
            "I couldn't move forward.",
        ),
        actuator(
            "robot_neutral",
            "Return the robot to neutral position. Use after any movement to reset position, or when the conversation is calm and relaxed.",
            "neutral",
            "Back to neutral.",
            "I couldn't return to neutral.",
        ),
    ]
}

fn actuator(
    name: &'static str,
    description: &'static str,
    endpoint: &'static str,
    done: &'static str,
    failed: &'static str,
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        parameters: vec![],
        kind: ToolKind::Actuator {
            endpoint,
            replies: ActuatorReplies { done, failed },
        },
    }
}

/// Routes engine tool calls to their handlers.
///
/// The dispatcher is stateless per invocation and can be shared across
/// concurrent calls behind an `Arc`.
pub struct ToolDispatcher {
    catalog: Vec<ToolSpec>,
    session: SessionHandle,
    actions: Arc<dyn ActionClient>,
}

impl ToolDispatcher {
    pub fn new(
        catalog: Vec<ToolSpec>,
        session: SessionHandle,
        actions: Arc<dyn ActionClient>,
    ) -> Self {
        Self {
            catalog,
            session,
            actions,
        }
    }

    pub fn catalog(&self) -> &[ToolSpec] {
        &self.catalog
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.iter().map(ToolSpec::definition).collect()
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Runs one invocation and returns the sentence handed back to the engine.
    #[instrument(name = "tool", skip_all, fields(tool = %invocation.name))]
    pub async fn dispatch(&self, invocation: ToolInvocation) -> String {
        let Some(spec) = self.catalog.iter().find(|s| s.name == invocation.name) else {
            warn!("Engine called a tool that is not in the catalog");
            return UNKNOWN_TOOL_REPLY.to_string();
        };

        let Some(side_channel) = self.session.side_channel() else {
            info!("No active session, tool unavailable");
            return match &spec.kind {
                ToolKind::Reveal(replies) => replies.unavailable.to_string(),
                ToolKind::Actuator { .. } => ACTUATOR_UNAVAILABLE_REPLY.to_string(),
            };
        };

        match &spec.kind {
            ToolKind::Reveal(replies) => self.reveal(spec, replies, side_channel, invocation).await,
            ToolKind::Actuator { endpoint, replies } => {
                let reply = if self.actions.invoke(endpoint).await {
                    replies.done
                } else {
                    replies.failed
                };
                reply.to_string()
            }
        }
    }

    async fn reveal(
        &self,
        spec: &ToolSpec,
        replies: &RevealReplies,
        side_channel: SideChannel,
        invocation: ToolInvocation,
    ) -> String {
        if let Some(missing) = spec
            .parameters
            .iter()
            .find(|p| invocation.arguments.get(p.name).is_none_or(|v| v.trim().is_empty()))
        {
            warn!(parameter = missing.name, "Tool called without a required parameter");
            return format!("I need the {} first.", missing.name);
        }

        let params: BTreeMap<String, String> = invocation
            .arguments
            .into_iter()
            .filter(|(k, _)| spec.parameters.iter().any(|p| p.name == k.as_str()))
            .collect();

        match side_channel
            .publish(&Envelope::tool_call(spec.name, params))
            .await
        {
            Ok(()) => {
                info!("Tool call sent");
                replies.shown.to_string()
            }
            Err(_) => replies.failed.to_string(),
        }
    }
}
