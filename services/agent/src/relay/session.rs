//! Manages the WebSocket connection lifecycle for one room client.

use super::RelayState;
use super::protocol::{ClientMessage, ServerMessage};
use anyhow::Result;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub identity: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a room client WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<JoinParams>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let identity = params
        .identity
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("guest-{}", rand::random::<u32>()));
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

#[instrument(name = "room_client", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, identity: String) {
    let (mut socket_tx, mut socket_rx) = socket.split();
    // Subscribe before joining so nothing published after the join is missed.
    let mut outbound = state.outbound();

    state.join(&identity);
    let joined = ServerMessage::Joined {
        identity: identity.clone(),
        room: state.room().to_string(),
    };
    if send_msg(&mut socket_tx, &joined).await.is_err() {
        state.leave(&identity);
        return;
    }

    loop {
        tokio::select! {
            incoming = socket_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::ActiveSpeakers { speakers }) => state.report_speakers(speakers),
                    Err(e) => warn!(error = %e, "Ignoring malformed client message."),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client closed the connection.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving from client WebSocket.");
                    break;
                }
            },
            frame = outbound.recv() => match frame {
                Ok(message) => {
                    if let Err(e) = send_msg(&mut socket_tx, &message).await {
                        debug!(error = %e, "Failed to forward frame, closing client.");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Client is too slow, dropped data frames.");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    state.leave(&identity);
}

/// Serializes and sends a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
