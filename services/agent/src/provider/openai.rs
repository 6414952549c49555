//! Conversation engine backed by the OpenAI Realtime API.
//!
//! Audio deltas from the model are ignored; see the module docs of
//! [`crate::provider`].

use super::{CONNECT_TIMEOUT, ProviderSettings, ProviderSocket, connect_within};
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent, ServerEvent as OAIServerEvent,
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use rumi_core::ToolInvocation;
use rumi_core::engine::{ConversationEngine, EngineError, EngineSessionConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage};
use tracing::{Instrument, debug, error, info, info_span, warn};

const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

type RealtimeSocket = ProviderSocket;

struct Running {
    tx: mpsc::Sender<OAIClientEvent>,
    task: JoinHandle<()>,
}

pub struct OpenAIEngine {
    settings: ProviderSettings,
    api_key: String,
    session: EngineSessionConfig,
    running: Option<Running>,
}

impl OpenAIEngine {
    pub fn new(settings: ProviderSettings, api_key: String, session: EngineSessionConfig) -> Self {
        Self {
            settings,
            api_key,
            session,
            running: None,
        }
    }

    fn url(&self) -> String {
        let base = self.settings.endpoint.as_deref().unwrap_or(REALTIME_URL);
        format!("{}?model={}", base, self.settings.model)
    }

    /// The `session.update` sent right after connecting.
    fn session_update(&self) -> OAIClientEvent {
        let tools = self
            .session
            .dispatcher
            .definitions()
            .into_iter()
            .map(|d| oai_realtime::ToolDefinition::Function {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect();

        let session_config = oai_realtime::SessionResource {
            model: Some(self.settings.model.clone()),
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.session.instructions.clone()),
            voice: Some(parse_voice(&self.settings.voice)),
            temperature: Some(self.settings.temperature),
            tools: Some(tools),
            ..Default::default()
        };
        OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
            session: session_config,
            event_id: None,
        })
    }
}

fn parse_voice(voice: &str) -> oai_realtime::RealtimeVoice {
    serde_json::from_value(Value::String(voice.to_lowercase())).unwrap_or_else(|_| {
        warn!(%voice, "Unknown realtime voice, using shimmer.");
        oai_realtime::RealtimeVoice::Shimmer
    })
}

fn system_message(text: &str) -> OAIClientEvent {
    let item = oai_realtime::Item {
        r#type: Some(oai_realtime::ItemType::Message),
        role: Some(oai_realtime::ItemRole::System),
        content: Some(vec![oai_realtime::ItemContent {
            r#type: oai_realtime::ItemContentType::InputText,
            text: Some(text.to_string()),
            audio: None,
            transcript: None,
        }]),
        id: None,
        status: None,
        call_id: None,
        name: None,
        arguments: None,
        output: None,
    };
    OAIClientEvent::ConversationItemCreate(oai_realtime::ConversationItemCreateEvent {
        item,
        event_id: None,
        previous_item_id: None,
    })
}

fn function_output(call_id: String, output: String) -> OAIClientEvent {
    let item = oai_realtime::Item {
        r#type: Some(oai_realtime::ItemType::FunctionCallOutput),
        role: None,
        content: None,
        id: None,
        status: None,
        call_id: Some(call_id),
        name: None,
        arguments: None,
        output: Some(output),
    };
    OAIClientEvent::ConversationItemCreate(oai_realtime::ConversationItemCreateEvent {
        item,
        event_id: None,
        previous_item_id: None,
    })
}

fn response_create() -> OAIClientEvent {
    OAIClientEvent::ResponseCreate(oai_realtime::ResponseCreateEvent {
        response: None,
        event_id: None,
    })
}

fn encode(event: &OAIClientEvent) -> Result<WsMessage, EngineError> {
    let text = serde_json::to_string(event).map_err(|e| EngineError::Protocol(e.to_string()))?;
    Ok(WsMessage::Text(text.into()))
}

#[async_trait]
impl ConversationEngine for OpenAIEngine {
    async fn start(&mut self) -> Result<(), EngineError> {
        if self.running.is_some() {
            return Ok(());
        }

        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| EngineError::Connect(e.to_string()))?;
        let auth = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|_| EngineError::Connect("API key is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse().map_err(|_| {
                EngineError::Connect("invalid OpenAI-Beta header".into())
            })?);

        let ws_stream = connect_within(request, CONNECT_TIMEOUT).await?;
        let (mut openai_tx, openai_rx) = ws_stream.split();
        info!(model = %self.settings.model, "Connected to OpenAI Realtime API.");

        openai_tx
            .send(encode(&self.session_update())?)
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        let span = info_span!("openai_realtime", room = %self.session.room);
        let task = tokio::spawn(
            run(openai_tx, openai_rx, rx, tx.clone(), self.session.clone()).instrument(span),
        );
        self.running = Some(Running { tx, task });
        Ok(())
    }

    async fn generate_reply(&mut self, instructions: &str) -> Result<(), EngineError> {
        let running = self.running.as_ref().ok_or(EngineError::NotRunning)?;
        for event in [system_message(instructions), response_create()] {
            running
                .tx
                .send(event)
                .await
                .map_err(|_| EngineError::NotRunning)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        if let Some(running) = self.running.take() {
            drop(running.tx);
            running.task.abort();
            info!("OpenAI realtime session closed.");
        }
        Ok(())
    }
}

impl Drop for OpenAIEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

/// Main event loop for the OpenAI connection.
async fn run(
    mut openai_tx: SplitSink<RealtimeSocket, WsMessage>,
    mut openai_rx: SplitStream<RealtimeSocket>,
    mut rx: mpsc::Receiver<OAIClientEvent>,
    tx: mpsc::Sender<OAIClientEvent>,
    session: EngineSessionConfig,
) {
    loop {
        tokio::select! {
            biased;
            Some(event) = rx.recv() => {
                let message = match encode(&event) {
                    Ok(message) => message,
                    Err(e) => {
                        error!(error = %e, "Failed to encode realtime event.");
                        continue;
                    }
                };
                if let Err(e) = openai_tx.send(message).await {
                    error!(error = %e, "Failed to send to OpenAI, stopping engine.");
                    break;
                }
            },
            msg = openai_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<OAIServerEvent>(&text) {
                        Ok(event) => handle_server_event(event, &tx, &session),
                        Err(_) => debug!("Ignoring unrecognized realtime event."),
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    warn!(?frame, "OpenAI closed the realtime connection.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Error reading from OpenAI WebSocket.");
                    break;
                }
                None => break,
            },
        }
    }
}

fn handle_server_event(
    event: OAIServerEvent,
    tx: &mpsc::Sender<OAIClientEvent>,
    session: &EngineSessionConfig,
) {
    match event {
        OAIServerEvent::ResponseOutputItemDone(done) => {
            let item = done.item;
            if !matches!(item.r#type, Some(oai_realtime::ItemType::FunctionCall)) {
                return;
            }
            let (Some(call_id), Some(name)) = (item.call_id, item.name) else {
                warn!("Function call without call_id or name, ignoring.");
                return;
            };
            let invocation =
                ToolInvocation::from_json_arguments(name, item.arguments.as_deref().unwrap_or("{}"));
            let dispatcher = session.dispatcher.clone();
            let tx = tx.clone();
            // The device call can take seconds; keep reading the socket meanwhile.
            tokio::spawn(
                async move {
                    let reply = dispatcher.dispatch(invocation).await;
                    for event in [function_output(call_id, reply), response_create()] {
                        if tx.send(event).await.is_err() {
                            debug!("Engine stopped before the tool reply was sent");
                            break;
                        }
                    }
                }
                .in_current_span(),
            );
        }
        OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e) => {
            info!(transcript = %e.transcript, "User said");
        }
        OAIServerEvent::Error(e) => {
            warn!(message = %e.error.message, "OpenAI realtime error");
        }
        _ => {}
    }
}
