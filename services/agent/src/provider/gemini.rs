//! Conversation engine backed by the Google Gemini Live API.
//!
//! Model audio in `serverContent` is ignored; only transcripts, turn
//! boundaries and tool calls are read.

use super::{CONNECT_TIMEOUT, ProviderSettings, ProviderSocket, connect_within};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use rumi_core::ToolInvocation;
use rumi_core::engine::{ConversationEngine, EngineError, EngineSessionConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{Instrument, debug, error, info, info_span, warn};

const LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);
const PREBUILT_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

type LiveSocket = ProviderSocket;

// --- Local Gemini Live types ---
mod gemini_live_types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(Setup),
        ClientContent(ClientContent),
        ToolResponse(ToolResponse),
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        pub tools: Vec<Tool>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<String>,
        pub temperature: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Tool {
        pub function_declarations: Vec<FunctionDeclaration>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct FunctionDeclaration {
        pub name: String,
        pub description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub parameters: Option<Value>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolResponse {
        pub function_responses: Vec<FunctionResponse>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct FunctionResponse {
        pub id: String,
        pub name: String,
        pub response: Value,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<Value>,
        pub tool_call: Option<ToolCall>,
        pub server_content: Option<ServerContent>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolCall {
        #[serde(default)]
        pub function_calls: Vec<FunctionCall>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct FunctionCall {
        #[serde(default)]
        pub id: String,
        pub name: String,
        #[serde(default)]
        pub args: Value,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerContent {
        pub input_transcription: Option<Transcription>,
        pub turn_complete: Option<bool>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Transcription {
        pub text: String,
    }
}

use gemini_live_types as live;

struct Running {
    tx: mpsc::Sender<live::ClientMessage>,
    task: JoinHandle<()>,
}

pub struct GeminiEngine {
    settings: ProviderSettings,
    api_key: String,
    session: EngineSessionConfig,
    running: Option<Running>,
}

impl GeminiEngine {
    pub fn new(settings: ProviderSettings, api_key: String, session: EngineSessionConfig) -> Self {
        Self {
            settings,
            api_key,
            session,
            running: None,
        }
    }

    fn url(&self) -> String {
        let base = self.settings.endpoint.as_deref().unwrap_or(LIVE_URL);
        format!("{}?key={}", base, self.api_key)
    }

    fn setup(&self) -> live::ClientMessage {
        let function_declarations = self
            .session
            .dispatcher
            .catalog()
            .iter()
            .map(|spec| live::FunctionDeclaration {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: (!spec.parameters.is_empty()).then(|| spec.parameters_schema()),
            })
            .collect();

        let speech_config = PREBUILT_VOICES
            .iter()
            .find(|v| v.eq_ignore_ascii_case(&self.settings.voice))
            .map(|v| live::SpeechConfig {
                voice_config: live::VoiceConfig {
                    prebuilt_voice_config: live::PrebuiltVoiceConfig {
                        voice_name: v.to_string(),
                    },
                },
            });

        live::ClientMessage::Setup(live::Setup {
            model: self.settings.model.clone(),
            generation_config: live::GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                temperature: self.settings.temperature,
                speech_config,
            },
            system_instruction: live::Content {
                role: None,
                parts: vec![live::Part {
                    text: self.session.instructions.clone(),
                }],
            },
            tools: vec![live::Tool {
                function_declarations,
            }],
        })
    }
}

fn encode(message: &live::ClientMessage) -> Result<WsMessage, EngineError> {
    let text = serde_json::to_string(message).map_err(|e| EngineError::Protocol(e.to_string()))?;
    Ok(WsMessage::Text(text.into()))
}

/// Reads until the server acknowledges the setup message.
async fn await_setup_complete(rx: &mut SplitStream<LiveSocket>) -> Result<(), EngineError> {
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                match serde_json::from_str::<live::ServerMessage>(&text) {
                    Ok(m) if m.setup_complete.is_some() => return Ok(()),
                    _ => debug!("Ignoring message received before setup completed."),
                }
            }
            Ok(WsMessage::Binary(data)) => {
                let parsed = serde_json::from_slice::<live::ServerMessage>(&data);
                if parsed.is_ok_and(|m| m.setup_complete.is_some()) {
                    return Ok(());
                }
            }
            Ok(WsMessage::Close(frame)) => {
                return Err(EngineError::Connect(format!(
                    "Gemini closed the connection during setup: {frame:?}"
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(EngineError::Connect(e.to_string())),
        }
    }
    Err(EngineError::Connect(
        "Gemini connection ended during setup".into(),
    ))
}

#[async_trait]
impl ConversationEngine for GeminiEngine {
    async fn start(&mut self) -> Result<(), EngineError> {
        if self.running.is_some() {
            return Ok(());
        }

        let ws_stream = connect_within(self.url(), CONNECT_TIMEOUT).await?;
        info!(model = %self.settings.model, "Connected to Gemini Live WebSocket.");
        let (mut gemini_tx, mut gemini_rx) = ws_stream.split();

        gemini_tx
            .send(encode(&self.setup())?)
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        tokio::time::timeout(SETUP_TIMEOUT, await_setup_complete(&mut gemini_rx))
            .await
            .map_err(|_| EngineError::Connect("timed out waiting for Gemini setup".into()))??;
        info!("Gemini session setup is complete.");

        let (tx, rx) = mpsc::channel(32);
        let span = info_span!("gemini_live", room = %self.session.room);
        let task = tokio::spawn(
            run(gemini_tx, gemini_rx, rx, tx.clone(), self.session.clone()).instrument(span),
        );
        self.running = Some(Running { tx, task });
        Ok(())
    }

    async fn generate_reply(&mut self, instructions: &str) -> Result<(), EngineError> {
        let running = self.running.as_ref().ok_or(EngineError::NotRunning)?;
        let turn = live::ClientMessage::ClientContent(live::ClientContent {
            turns: vec![live::Content {
                role: Some("user".to_string()),
                parts: vec![live::Part {
                    text: instructions.to_string(),
                }],
            }],
            turn_complete: true,
        });
        running
            .tx
            .send(turn)
            .await
            .map_err(|_| EngineError::NotRunning)
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if let Some(running) = self.running.take() {
            drop(running.tx);
            running.task.abort();
            info!("Gemini live session closed.");
        }
        Ok(())
    }
}

impl Drop for GeminiEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

/// Main event loop for the Gemini connection.
async fn run(
    mut gemini_tx: SplitSink<LiveSocket, WsMessage>,
    mut gemini_rx: SplitStream<LiveSocket>,
    mut rx: mpsc::Receiver<live::ClientMessage>,
    tx: mpsc::Sender<live::ClientMessage>,
    session: EngineSessionConfig,
) {
    loop {
        tokio::select! {
            biased;
            Some(message) = rx.recv() => {
                let frame = match encode(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(error = %e, "Failed to encode Gemini message.");
                        continue;
                    }
                };
                if let Err(e) = gemini_tx.send(frame).await {
                    error!(error = %e, "Failed to send to Gemini, stopping engine.");
                    break;
                }
            },
            msg = gemini_rx.next() => {
                let parsed = match msg {
                    Some(Ok(WsMessage::Text(text))) => serde_json::from_str::<live::ServerMessage>(&text).ok(),
                    Some(Ok(WsMessage::Binary(data))) => serde_json::from_slice::<live::ServerMessage>(&data).ok(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        warn!(?frame, "Gemini closed the live connection.");
                        break;
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        error!(error = %e, "Error reading from Gemini WebSocket.");
                        break;
                    }
                    None => break,
                };
                if let Some(message) = parsed {
                    handle_server_message(message, &tx, &session);
                }
            },
        }
    }
}

fn handle_server_message(
    message: live::ServerMessage,
    tx: &mpsc::Sender<live::ClientMessage>,
    session: &EngineSessionConfig,
) {
    if let Some(content) = message.server_content {
        if let Some(transcription) = content.input_transcription {
            info!(transcript = %transcription.text, "User said");
        }
        if content.turn_complete == Some(true) {
            debug!("Model turn complete.");
        }
    }

    let Some(tool_call) = message.tool_call else {
        return;
    };
    for call in tool_call.function_calls {
        let invocation = ToolInvocation::from_value_arguments(call.name.clone(), &call.args);
        let dispatcher = session.dispatcher.clone();
        let tx = tx.clone();
        tokio::spawn(
            async move {
                let reply = dispatcher.dispatch(invocation).await;
                let response = live::ClientMessage::ToolResponse(live::ToolResponse {
                    function_responses: vec![live::FunctionResponse {
                        id: call.id,
                        name: call.name,
                        response: serde_json::json!({ "result": reply }),
                    }],
                });
                send_tool_reply(&tx, response).await;
            }
            .in_current_span(),
        );
    }
}

/// Queues a tool reply for the socket; `false` once the engine has stopped.
async fn send_tool_reply(
    tx: &mpsc::Sender<live::ClientMessage>,
    response: live::ClientMessage,
) -> bool {
    if tx.send(response).await.is_err() {
        debug!("Engine stopped before the tool reply was sent");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::provider::ProviderEngineFactory;
    use crate::provider::fake_realtime::{closed_endpoint, fake_server, next, session_config};
    use rumi_core::SessionHandle;
    use rumi_core::engine::EngineFactory;
    use serde_json::json;

    fn engine(endpoint: String, voice: &str) -> Box<dyn ConversationEngine> {
        let factory = ProviderEngineFactory::new(ProviderSettings {
            provider: Provider::Gemini,
            api_key: Some("test-key".into()),
            model: "models/gemini-2.0-flash-exp".into(),
            voice: voice.into(),
            temperature: 0.6,
            endpoint: Some(endpoint),
        });
        factory.create(session_config(SessionHandle::new())).unwrap()
    }

    #[tokio::test]
    async fn test_setup_carries_instructions_and_tools() {
        let (url, mut seen) = fake_server(vec![json!({"setupComplete": {}})]).await;
        let mut engine = engine(url, "kore");
        engine.start().await.unwrap();

        let setup = &next(&mut seen).await["setup"];
        assert_eq!(setup["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "You are Rumi.");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        let declarations = setup["tools"][0]["functionDeclarations"].as_array().unwrap();
        let show_map = declarations.iter().find(|d| d["name"] == "show_map").unwrap();
        assert!(show_map.get("parameters").is_none());
        let check_in = declarations.iter().find(|d| d["name"] == "check_in").unwrap();
        assert_eq!(check_in["parameters"]["required"], json!(["name"]));

        engine.generate_reply("Greet the guest.").await.unwrap();
        let content = next(&mut seen).await;
        assert_eq!(content["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(
            content["clientContent"]["turns"][0]["parts"][0]["text"],
            "Greet the guest."
        );
        assert_eq!(content["clientContent"]["turnComplete"], true);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_openai_voice_is_not_sent_to_gemini() {
        let (url, mut seen) = fake_server(vec![json!({"setupComplete": {}})]).await;
        let mut engine = engine(url, "shimmer");
        engine.start().await.unwrap();

        let setup = next(&mut seen).await;
        assert!(setup["setup"]["generationConfig"].get("speechConfig").is_none());
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tool_call_gets_tool_response() {
        let (url, mut seen) = fake_server(vec![
            json!({"setupComplete": {}}),
            json!({"toolCall": {"functionCalls": [
                {"id": "fc_1", "name": "check_in", "args": {"name": "Ada"}}
            ]}}),
        ])
        .await;
        let mut engine = engine(url, "shimmer");
        engine.start().await.unwrap();
        assert!(next(&mut seen).await.get("setup").is_some());

        let response = next(&mut seen).await;
        let reply = &response["toolResponse"]["functionResponses"][0];
        assert_eq!(reply["id"], "fc_1");
        assert_eq!(reply["name"], "check_in");
        assert_eq!(
            reply["response"]["result"],
            "The check-in system is currently unavailable."
        );

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_to_start() {
        let mut engine = engine(closed_endpoint().await, "shimmer");
        assert!(matches!(engine.start().await, Err(EngineError::Connect(_))));
    }

    #[tokio::test]
    async fn test_tool_reply_after_engine_stopped_is_reported() {
        let reply = || {
            live::ClientMessage::ToolResponse(live::ToolResponse {
                function_responses: vec![live::FunctionResponse {
                    id: "call-1".into(),
                    name: "robot_hello".into(),
                    response: json!({ "result": "Waving hello!" }),
                }],
            })
        };
        let (tx, mut rx) = mpsc::channel(1);
        assert!(send_tool_reply(&tx, reply()).await);
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(!send_tool_reply(&tx, reply()).await);
    }
}
