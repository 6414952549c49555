//! The real-time room transport, seen from the orchestrator.
//!
//! Media flows through the transport untouched; the orchestrator only needs
//! room signals and an outbound data path for side-channel messages.

use crate::emotion::{ActiveSpeaker, SpeakerActivity};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Signals emitted by the transport while a session is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSignal {
    /// A remote participant joined the room.
    ParticipantConnected(String),
    /// The set of currently speaking participants changed.
    ActiveSpeakersChanged(Vec<ActiveSpeaker>),
    /// The agent was disconnected from the room.
    Disconnected,
}

impl RoomSignal {
    pub fn speakers(speakers: Vec<ActiveSpeaker>) -> Self {
        RoomSignal::ActiveSpeakersChanged(speakers)
    }

    /// Converts an active-speakers signal into the tracker's input.
    pub fn speaker_activity(&self) -> Option<SpeakerActivity> {
        match self {
            RoomSignal::ActiveSpeakersChanged(speakers) => {
                Some(SpeakerActivity::new(speakers.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("failed to connect transport: {0}")]
    Connect(String),
    #[error("transport closed")]
    Closed,
}

/// The transport collaborator.
///
/// `publish` may be called concurrently from the signal loop and from tool
/// invocations; each call is one complete, independent message.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The room identifier this transport is bound to.
    fn room_name(&self) -> &str;

    /// Identity of the agent's own participant.
    fn local_identity(&self) -> &str;

    /// Establishes the connection. Calling it while connected is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Blocks until at least one remote participant is present and returns
    /// its identity.
    async fn wait_for_participant(&self) -> Result<String, TransportError>;

    /// Starts delivering room signals into a bounded queue.
    ///
    /// Emitters must not block on a full queue. A newer subscription replaces
    /// the previous one.
    fn subscribe(&self, capacity: usize) -> mpsc::Receiver<RoomSignal>;

    /// Sends `payload` on the named data topic.
    async fn publish(&self, payload: Vec<u8>, topic: &str) -> Result<(), TransportError>;
}

/// Delivers a signal into a subscriber queue without blocking.
///
/// Returns false when the signal was dropped because the queue is full or
/// nobody is listening. `Disconnected` is never dropped: on a full queue it
/// is handed to a background send so the consumer still observes it.
pub fn emit_signal(tx: &mpsc::Sender<RoomSignal>, signal: RoomSignal) -> bool {
    match tx.try_send(signal) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(RoomSignal::Disconnected)) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(RoomSignal::Disconnected).await;
            });
            true
        }
        Err(mpsc::error::TrySendError::Full(signal)) => {
            tracing::warn!(?signal, "Signal queue full, dropping room signal.");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_activity_only_for_speaker_signals() {
        let signal = RoomSignal::speakers(vec![ActiveSpeaker::remote("guest")]);
        assert_eq!(signal.speaker_activity().unwrap().speakers.len(), 1);
        assert!(RoomSignal::Disconnected.speaker_activity().is_none());
        assert!(
            RoomSignal::ParticipantConnected("guest".into())
                .speaker_activity()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_emit_signal_never_blocks_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let speaking = RoomSignal::speakers(vec![ActiveSpeaker::remote("guest")]);
        assert!(emit_signal(&tx, speaking.clone()));
        assert!(!emit_signal(&tx, speaking.clone()));
        assert_eq!(rx.recv().await, Some(speaking));

        drop(rx);
        assert!(!emit_signal(&tx, RoomSignal::Disconnected));
    }

    #[tokio::test]
    async fn test_disconnect_survives_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let speaking = RoomSignal::speakers(vec![]);
        assert!(emit_signal(&tx, speaking.clone()));
        assert!(emit_signal(&tx, RoomSignal::Disconnected));

        assert_eq!(rx.recv().await, Some(speaking));
        assert_eq!(rx.recv().await, Some(RoomSignal::Disconnected));
    }
}
