//! A scripted realtime WebSocket server for engine tests.

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use rumi_core::action_client::ActionClient;
use rumi_core::engine::EngineSessionConfig;
use rumi_core::tools::default_catalog;
use rumi_core::{SessionHandle, ToolDispatcher};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) struct NoopActions;

#[async_trait]
impl ActionClient for NoopActions {
    async fn invoke(&self, _action: &str) -> bool {
        true
    }
}

pub(crate) fn session_config(session: SessionHandle) -> EngineSessionConfig {
    EngineSessionConfig {
        instructions: "You are Rumi.".into(),
        room: "rumi-room".into(),
        dispatcher: Arc::new(ToolDispatcher::new(
            default_catalog(),
            session,
            Arc::new(NoopActions),
        )),
    }
}

type Shared = Arc<(mpsc::UnboundedSender<Value>, Vec<Value>)>;

/// Starts a server that forwards every client frame to the returned
/// receiver and pushes `script` right after the first client frame.
pub(crate) async fn fake_server(script: Vec<Value>) -> (String, mpsc::UnboundedReceiver<Value>) {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let state: Shared = Arc::new((seen_tx, script));

    let app = Router::new().route("/", get(upgrade)).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("ws://{addr}/"), seen_rx)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Shared>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn serve(mut socket: WebSocket, state: Shared) {
    let mut scripted = false;
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            let _ = state.0.send(value);
            if !scripted {
                scripted = true;
                for event in &state.1 {
                    let _ = socket.send(Message::Text(event.to_string().into())).await;
                }
            }
        }
    }
}

pub(crate) async fn next(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for client frame")
        .expect("fake server stopped")
}

/// An address nothing listens on.
pub(crate) async fn closed_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/")
}
