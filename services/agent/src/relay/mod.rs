//! WebSocket Room Relay
//!
//! A single-room transport the agent hosts itself. Room clients (the robot's
//! UI and the media bridge that carries audio to the realtime engine) connect
//! over WebSocket, receive every side-channel message as a `data` frame and
//! report who is speaking. It is structured into submodules:
//!
//! - `protocol`: the JSON frames exchanged with clients.
//! - `session`: the per-connection WebSocket lifecycle.

pub mod protocol;
pub mod session;

pub use session::ws_handler;

use crate::router::create_router;
use async_trait::async_trait;
use protocol::ServerMessage;
use rumi_core::ActiveSpeaker;
use rumi_core::transport::{RoomSignal, Transport, TransportError, emit_signal};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const OUTBOUND_CAPACITY: usize = 256;

/// Room state shared between the relay and its WebSocket handlers.
pub struct RelayState {
    room: String,
    local_identity: String,
    /// Remote participants in join order.
    participants: watch::Sender<Vec<String>>,
    outbound: broadcast::Sender<ServerMessage>,
    signals: Mutex<Option<mpsc::Sender<RoomSignal>>>,
}

impl RelayState {
    pub fn new(room: impl Into<String>, local_identity: impl Into<String>) -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            room: room.into(),
            local_identity: local_identity.into(),
            participants: watch::Sender::new(Vec::new()),
            outbound,
            signals: Mutex::new(None),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn participants(&self) -> Vec<String> {
        self.participants.borrow().clone()
    }

    pub(crate) fn is_local(&self, identity: &str) -> bool {
        identity == self.local_identity
    }

    /// Registers a connected client. Clients using the agent's own identity
    /// are its media bridge and do not count as participants.
    pub(crate) fn join(&self, identity: &str) {
        if self.is_local(identity) {
            debug!(%identity, "Media bridge attached to room.");
            return;
        }
        self.participants
            .send_modify(|list| list.push(identity.to_string()));
        info!(%identity, room = %self.room, "Participant joined.");
        self.emit(RoomSignal::ParticipantConnected(identity.to_string()));
    }

    /// Removes a client. When the last remote participant leaves the agent
    /// is disconnected from the conversation.
    pub(crate) fn leave(&self, identity: &str) {
        if self.is_local(identity) {
            return;
        }
        let mut now_empty = false;
        self.participants.send_modify(|list| {
            if let Some(pos) = list.iter().position(|p| p == identity) {
                list.remove(pos);
            }
            now_empty = list.is_empty();
        });
        info!(%identity, room = %self.room, "Participant left.");
        if now_empty {
            self.emit(RoomSignal::Disconnected);
        }
    }

    pub(crate) fn report_speakers(&self, speakers: Vec<String>) {
        let speakers = speakers
            .into_iter()
            .map(|identity| {
                if self.is_local(&identity) {
                    ActiveSpeaker::local(identity)
                } else {
                    ActiveSpeaker::remote(identity)
                }
            })
            .collect();
        self.emit(RoomSignal::speakers(speakers));
    }

    pub(crate) fn outbound(&self) -> broadcast::Receiver<ServerMessage> {
        self.outbound.subscribe()
    }

    fn emit(&self, signal: RoomSignal) {
        let guard = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            emit_signal(tx, signal);
        }
    }

    fn subscribe(&self, capacity: usize) -> mpsc::Receiver<RoomSignal> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        // Everyone may have left between the participant wait and now.
        if self.participants.borrow().is_empty() {
            emit_signal(&tx, RoomSignal::Disconnected);
        }
        *self.signals.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    /// Sends a frame to every connected client. Returns how many received it.
    fn broadcast(&self, message: ServerMessage) -> usize {
        self.outbound.send(message).unwrap_or(0)
    }
}

struct RunningServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// The transport the orchestrator drives: an embedded WebSocket server
/// bound once and kept across sequential sessions.
pub struct RoomRelay {
    state: Arc<RelayState>,
    bind_address: SocketAddr,
    server: tokio::sync::Mutex<Option<RunningServer>>,
}

impl RoomRelay {
    pub fn new(
        room: impl Into<String>,
        local_identity: impl Into<String>,
        bind_address: SocketAddr,
    ) -> Self {
        Self {
            state: Arc::new(RelayState::new(room, local_identity)),
            bind_address,
            server: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// The bound address once connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|s| s.local_addr)
    }
}

impl Drop for RoomRelay {
    fn drop(&mut self) {
        if let Some(server) = self.server.get_mut().take() {
            server.task.abort();
        }
    }
}

#[async_trait]
impl Transport for RoomRelay {
    fn room_name(&self) -> &str {
        self.state.room()
    }

    fn local_identity(&self) -> &str {
        self.state.local_identity()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Ok(());
        }

        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let app = create_router(self.state.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Room relay server stopped.");
            }
        });
        info!(room = %self.state.room(), %local_addr, "Room relay listening.");

        *server = Some(RunningServer { local_addr, task });
        Ok(())
    }

    async fn wait_for_participant(&self) -> Result<String, TransportError> {
        if self.server.lock().await.is_none() {
            return Err(TransportError::NotConnected);
        }
        let mut rx = self.state.participants.subscribe();
        let participants = rx
            .wait_for(|list| !list.is_empty())
            .await
            .map_err(|_| TransportError::Closed)?;
        participants.first().cloned().ok_or(TransportError::Closed)
    }

    fn subscribe(&self, capacity: usize) -> mpsc::Receiver<RoomSignal> {
        self.state.subscribe(capacity)
    }

    async fn publish(&self, payload: Vec<u8>, topic: &str) -> Result<(), TransportError> {
        if self.server.lock().await.is_none() {
            return Err(TransportError::NotConnected);
        }
        let delivered = self.state.broadcast(ServerMessage::data(topic, &payload));
        debug!(%topic, delivered, "Relayed data frame.");
        Ok(())
    }
}
