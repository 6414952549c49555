//! Session Orchestrator
//!
//! Drives one conversation through its lifecycle:
//!
//! ```text
//! INIT ─▶ CONNECTING ─▶ AWAITING_PARTICIPANT ─▶ ACTIVE ─▶ CLOSING ─▶ CLOSED
//! ```
//!
//! While active, room signals are drained from a bounded queue by a single
//! consumer loop. Speaker changes go through the [`EmotionTracker`] and every
//! emitted state is handed to a dedicated publisher task, so a slow side
//! channel never stalls signal handling. Tool calls reach the dispatcher
//! directly from the engine through the bound [`SessionHandle`].

use crate::cleanup::{RoomAdmin, cleanup_stale_rooms};
use crate::emotion::{EmotionState, EmotionTracker, SpeakerActivity};
use crate::engine::{ConversationEngine, EngineError, EngineFactory, EngineSessionConfig};
use crate::envelope::Envelope;
use crate::session::{SessionBinding, SessionHandle};
use crate::side_channel::SideChannel;
use crate::tools::ToolDispatcher;
use crate::transport::{RoomSignal, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Lifecycle phase of the orchestrator's current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Connecting,
    AwaitingParticipant,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no participant joined within {0:?}")]
    ParticipantTimeout(Duration),
    #[error("agent is shutting down")]
    ShuttingDown,
}

impl OrchestratorError {
    /// Whether the process should stop instead of waiting for the next session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::Engine(e) if e.is_fatal())
    }
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Persona instructions handed to the engine.
    pub instructions: String,
    /// Steering instructions for the opening greeting.
    pub greeting: String,
    pub signal_capacity: usize,
    pub publish_capacity: usize,
    /// `None` waits for the first participant forever.
    pub participant_timeout: Option<Duration>,
    /// How long in-flight emotion publishes may take once the session closes.
    pub publish_drain_timeout: Duration,
    /// Rooms whose name contains this are deleted at startup.
    pub stale_room_pattern: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            greeting: "Greet the user and ask what you can help them with today.".to_string(),
            signal_capacity: 64,
            publish_capacity: 32,
            participant_timeout: None,
            publish_drain_timeout: Duration::from_secs(1),
            stale_room_pattern: "rummi".to_string(),
        }
    }
}

/// What happened during one session, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub room: String,
    pub participant: String,
    pub signals_handled: usize,
    pub emotion_updates: usize,
}

pub struct SessionOrchestrator {
    transport: Arc<dyn Transport>,
    engines: Arc<dyn EngineFactory>,
    dispatcher: Arc<ToolDispatcher>,
    admin: Option<Arc<dyn RoomAdmin>>,
    settings: SessionSettings,
    phase: watch::Sender<SessionPhase>,
    shutdown: watch::Sender<bool>,
}

impl SessionOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        engines: Arc<dyn EngineFactory>,
        dispatcher: Arc<ToolDispatcher>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            transport,
            engines,
            dispatcher,
            admin: None,
            settings,
            phase: watch::Sender::new(SessionPhase::Init),
            shutdown: watch::Sender::new(false),
        }
    }

    /// Enables stale-room cleanup at startup.
    pub fn with_room_admin(mut self, admin: Arc<dyn RoomAdmin>) -> Self {
        self.admin = Some(admin);
        self
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn session(&self) -> &SessionHandle {
        self.dispatcher.session()
    }

    /// Asks the current session to wind down through its normal teardown.
    /// Later calls to [`run_session`](Self::run_session) fail with
    /// [`OrchestratorError::ShuttingDown`].
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Shutdown requested.");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The INIT step: best-effort removal of stale rooms.
    pub async fn startup(&self) {
        self.set_phase(SessionPhase::Init);
        match &self.admin {
            Some(admin) => {
                cleanup_stale_rooms(admin.as_ref(), &self.settings.stale_room_pattern).await;
            }
            None => info!("Missing room admin credentials, skipping room cleanup"),
        }
    }

    /// Runs one session from connection to teardown.
    ///
    /// Teardown runs on every path out of the active phase, including engine
    /// failures. Returns an error only when the session could not be served.
    pub async fn run_session(&self) -> Result<SessionSummary, OrchestratorError> {
        let room = self.transport.room_name().to_string();
        let span = info_span!("session", %room);
        self.run_session_inner(room).instrument(span).await
    }

    async fn run_session_inner(&self, room: String) -> Result<SessionSummary, OrchestratorError> {
        if self.is_shutting_down() {
            return Err(OrchestratorError::ShuttingDown);
        }
        self.set_phase(SessionPhase::Connecting);
        info!("Waiting for user to connect...");
        if let Err(e) = self.transport.connect().await {
            self.set_phase(SessionPhase::Closed);
            return Err(e.into());
        }
        info!("Connected to room");

        self.set_phase(SessionPhase::AwaitingParticipant);
        let mut shutdown = self.shutdown.subscribe();
        let waited = tokio::select! {
            waited = self.await_participant() => waited,
            _ = shutdown_requested(&mut shutdown) => Err(OrchestratorError::ShuttingDown),
        };
        let participant = match waited {
            Ok(participant) => participant,
            Err(e) => {
                self.set_phase(SessionPhase::Closed);
                return Err(e);
            }
        };
        info!(%participant, "User connected");

        let signals = self.transport.subscribe(self.settings.signal_capacity);
        let mut session = Session::open(
            room.clone(),
            self.dispatcher.session(),
            SideChannel::new(self.transport.clone()),
            self.settings.publish_capacity,
        );
        self.set_phase(SessionPhase::Active);

        let outcome = self.drive(&mut session, signals).await;

        self.set_phase(SessionPhase::Closing);
        let emotion_updates = session.close(self.settings.publish_drain_timeout).await;
        self.set_phase(SessionPhase::Closed);

        match outcome {
            Ok(signals_handled) => {
                info!(signals_handled, emotion_updates, "Agent session ended.");
                Ok(SessionSummary {
                    room,
                    participant,
                    signals_handled,
                    emotion_updates,
                })
            }
            Err(e) => {
                error!(error = %e, "Agent session terminated with error.");
                Err(e)
            }
        }
    }

    async fn await_participant(&self) -> Result<String, OrchestratorError> {
        match self.settings.participant_timeout {
            Some(limit) => tokio::time::timeout(limit, self.transport.wait_for_participant())
                .await
                .map_err(|_| OrchestratorError::ParticipantTimeout(limit))?
                .map_err(OrchestratorError::from),
            None => Ok(self.transport.wait_for_participant().await?),
        }
    }

    /// The ACTIVE phase. Returns the number of room signals handled.
    ///
    /// Engine start and the greeting race the signal queue: a disconnect or
    /// shutdown during either skips straight to teardown.
    async fn drive(
        &self,
        session: &mut Session,
        mut signals: mpsc::Receiver<RoomSignal>,
    ) -> Result<usize, OrchestratorError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut backlog = VecDeque::new();
        session.set_emotion(EmotionState::Interested);

        let engine = self.engines.create(EngineSessionConfig {
            instructions: self.settings.instructions.clone(),
            room: session.room.clone(),
            dispatcher: self.dispatcher.clone(),
        })?;
        let engine = session.engine.insert(engine);
        let started = interruptible(engine.start(), &mut signals, &mut shutdown, &mut backlog).await;
        match started {
            Some(started) => {
                started?;
                info!("Agent session started, generating greeting...");
                session.set_emotion(EmotionState::Talking);
                if let Some(engine) = session.engine.as_mut() {
                    let greeting = engine.generate_reply(&self.settings.greeting);
                    let greeted =
                        interruptible(greeting, &mut signals, &mut shutdown, &mut backlog).await;
                    match greeted {
                        Some(Err(e)) => warn!(error = %e, "Failed to request greeting"),
                        Some(Ok(())) => info!("Agent is now listening..."),
                        None => debug!("Greeting abandoned"),
                    }
                }
            }
            None => info!("Session ended before the engine started"),
        }

        let mut handled = 0;
        loop {
            let next = match backlog.pop_front() {
                Some(signal) => Some(signal),
                None => tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => {
                        info!("Shutting down agent...");
                        break;
                    }
                    signal = signals.recv() => signal,
                },
            };
            let Some(signal) = next else {
                warn!("Room signal source closed, shutting down agent...");
                break;
            };
            handled += 1;
            match signal {
                RoomSignal::Disconnected => {
                    info!("Room disconnected, shutting down agent...");
                    break;
                }
                RoomSignal::ParticipantConnected(identity) => {
                    info!(participant = %identity, "Participant joined");
                }
                RoomSignal::ActiveSpeakersChanged(speakers) => {
                    session.observe(&SpeakerActivity::new(speakers));
                }
            }
        }
        Ok(handled)
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "Session phase changed");
        }
    }
}

/// Runs `step` while still draining room signals.
///
/// Signals that arrive meanwhile are queued on `backlog` for the signal loop.
/// Returns `None`, abandoning the step, once the room disconnects, the signal
/// source closes or shutdown is requested.
async fn interruptible<T>(
    step: impl Future<Output = T>,
    signals: &mut mpsc::Receiver<RoomSignal>,
    shutdown: &mut watch::Receiver<bool>,
    backlog: &mut VecDeque<RoomSignal>,
) -> Option<T> {
    tokio::pin!(step);
    loop {
        tokio::select! {
            biased;
            output = &mut step => return Some(output),
            _ = shutdown_requested(shutdown) => return None,
            signal = signals.recv() => match signal {
                Some(RoomSignal::Disconnected) => {
                    backlog.push_back(RoomSignal::Disconnected);
                    return None;
                }
                Some(signal) => backlog.push_back(signal),
                None => return None,
            },
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// The state owned by one active session.
struct Session {
    room: String,
    tracker: EmotionTracker,
    /// Last state accepted by the publisher.
    queued: EmotionState,
    engine: Option<Box<dyn ConversationEngine>>,
    binding: Option<SessionBinding>,
    emotions: Option<EmotionPublisher>,
    live: bool,
}

impl Session {
    fn open(
        room: String,
        handle: &SessionHandle,
        side_channel: SideChannel,
        publish_capacity: usize,
    ) -> Self {
        let binding = handle.bind(room.clone(), side_channel.clone());
        let tracker = EmotionTracker::new();
        Self {
            room,
            queued: tracker.current(),
            tracker,
            engine: None,
            binding: Some(binding),
            emotions: Some(EmotionPublisher::spawn(side_channel, publish_capacity)),
            live: true,
        }
    }

    fn set_emotion(&mut self, state: EmotionState) {
        if let Some(changed) = self.tracker.set(state) {
            self.publish_emotion(changed);
        }
    }

    fn observe(&mut self, activity: &SpeakerActivity) {
        if let Some(changed) = self.tracker.observe(activity) {
            self.publish_emotion(changed);
        }
    }

    fn publish_emotion(&mut self, state: EmotionState) {
        let Some(publisher) = &self.emotions else {
            return;
        };
        if publisher.send(state) {
            self.queued = state;
        } else {
            // Roll back so the next matching observation is sent again.
            self.tracker.set(self.queued);
        }
    }

    /// Clears the session slot, closes the engine and drains pending
    /// publishes. Only the first call does anything.
    ///
    /// Returns the number of emotion updates published during the session.
    async fn close(&mut self, drain_timeout: Duration) -> usize {
        if !self.live {
            return 0;
        }
        self.live = false;
        self.binding.take();

        if let Some(mut engine) = self.engine.take() {
            info!("Closing agent session...");
            if let Err(e) = engine.close().await {
                warn!(error = %e, "Engine close failed");
            }
        }

        match self.emotions.take() {
            Some(publisher) => publisher.finish(drain_timeout).await,
            None => 0,
        }
    }
}

/// Publishes emotion updates in order on a background task.
struct EmotionPublisher {
    tx: mpsc::Sender<EmotionState>,
    task: JoinHandle<usize>,
}

impl EmotionPublisher {
    fn spawn(side_channel: SideChannel, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<EmotionState>(capacity.max(1));
        let task = tokio::spawn(
            async move {
                let mut published = 0;
                while let Some(state) = rx.recv().await {
                    if side_channel.publish(&Envelope::emotion(state)).await.is_ok() {
                        info!(emotion = %state, "Sent emotion update");
                        published += 1;
                    }
                }
                published
            }
            .in_current_span(),
        );
        Self { tx, task }
    }

    /// Queues `state`; `false` when the update was dropped.
    fn send(&self, state: EmotionState) -> bool {
        match self.tx.try_send(state) {
            Ok(()) => true,
            Err(e) => {
                warn!(emotion = %state, error = %e, "Dropping emotion update");
                false
            }
        }
    }

    /// Stops accepting updates and waits briefly for queued ones.
    async fn finish(self, timeout: Duration) -> usize {
        let Self { tx, mut task } = self;
        drop(tx);
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(published)) => published,
            Ok(Err(e)) => {
                warn!(error = %e, "Emotion publisher task failed");
                0
            }
            Err(_) => {
                warn!("Discarding emotion updates still in flight");
                task.abort();
                0
            }
        }
    }
}
