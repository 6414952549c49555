//! In-memory collaborators shared by the unit tests.

use crate::engine::{ConversationEngine, EngineError, EngineFactory, EngineSessionConfig};
use crate::tools::ToolInvocation;
use crate::transport::{RoomSignal, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// A room that records publishes and replays scripted signals.
pub(crate) struct FakeTransport {
    room: String,
    local: String,
    published: Mutex<Vec<(String, Value)>>,
    fail_publish: AtomicBool,
    participant: watch::Sender<Option<String>>,
    script: Mutex<Vec<RoomSignal>>,
    signals: Mutex<Option<mpsc::Sender<RoomSignal>>>,
    pub(crate) connects: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new(room: &str, local: &str) -> Self {
        Self {
            room: room.to_string(),
            local: local.to_string(),
            published: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
            participant: watch::Sender::new(None),
            script: Mutex::new(Vec::new()),
            signals: Mutex::new(None),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    /// The `emotion` values published so far, in order.
    pub(crate) fn emotions(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(topic, _)| topic == "emotion")
            .filter_map(|(_, v)| v["emotion"].as_str().map(str::to_string))
            .collect()
    }

    pub(crate) fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn join(&self, identity: &str) {
        self.participant.send_replace(Some(identity.to_string()));
    }

    /// Signals delivered as soon as the orchestrator subscribes.
    pub(crate) fn script(&self, signals: Vec<RoomSignal>) {
        *self.script.lock().unwrap() = signals;
    }

    /// Drops the signal sender, as a transport that went away would.
    pub(crate) fn drop_signals(&self) {
        self.signals.lock().unwrap().take();
    }

    pub(crate) fn clear_publishes(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn room_name(&self) -> &str {
        &self.room
    }

    fn local_identity(&self) -> &str {
        &self.local
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_participant(&self) -> Result<String, TransportError> {
        let mut rx = self.participant.subscribe();
        let identity = rx
            .wait_for(|p| p.is_some())
            .await
            .map_err(|_| TransportError::Closed)?
            .clone();
        Ok(identity.unwrap_or_default())
    }

    fn subscribe(&self, capacity: usize) -> mpsc::Receiver<RoomSignal> {
        let script: Vec<RoomSignal> = self.script.lock().unwrap().drain(..).collect();
        let (tx, rx) = mpsc::channel(capacity.max(script.len()).max(1));
        for signal in script {
            tx.try_send(signal).unwrap();
        }
        *self.signals.lock().unwrap() = Some(tx);
        rx
    }

    async fn publish(&self, payload: Vec<u8>, topic: &str) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let value: Value = serde_json::from_slice(&payload).unwrap();
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), value));
        Ok(())
    }
}

/// Shared record of engine calls, in order.
#[derive(Clone, Default)]
pub(crate) struct EngineLog(Arc<Mutex<Vec<String>>>);

impl EngineLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub(crate) struct FakeEngineFactory {
    pub(crate) log: EngineLog,
    pub(crate) fail_create: bool,
    pub(crate) fail_start: bool,
    pub(crate) fail_close: bool,
    /// `start` never completes, like a stalled provider handshake.
    pub(crate) hang_start: bool,
    pub(crate) hang_reply: bool,
    /// Tool calls the engine makes while starting, as a model would mid-turn.
    pub(crate) tool_calls: Vec<ToolInvocation>,
    pub(crate) created: AtomicUsize,
}

impl EngineFactory for FakeEngineFactory {
    fn create(
        &self,
        config: EngineSessionConfig,
    ) -> Result<Box<dyn ConversationEngine>, EngineError> {
        if self.fail_create {
            return Err(EngineError::MissingCredentials("OPENAI_API_KEY".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("create:{}", config.room));
        Ok(Box::new(FakeEngine {
            log: self.log.clone(),
            config,
            fail_start: self.fail_start,
            fail_close: self.fail_close,
            hang_start: self.hang_start,
            hang_reply: self.hang_reply,
            tool_calls: self.tool_calls.clone(),
        }))
    }
}

struct FakeEngine {
    log: EngineLog,
    config: EngineSessionConfig,
    fail_start: bool,
    fail_close: bool,
    hang_start: bool,
    hang_reply: bool,
    tool_calls: Vec<ToolInvocation>,
}

#[async_trait]
impl ConversationEngine for FakeEngine {
    async fn start(&mut self) -> Result<(), EngineError> {
        if self.fail_start {
            return Err(EngineError::Connect("refused".into()));
        }
        self.log.push("start");
        if self.hang_start {
            std::future::pending::<()>().await;
        }
        for call in self.tool_calls.clone() {
            let reply = self.config.dispatcher.dispatch(call).await;
            self.log.push(format!("tool:{reply}"));
        }
        Ok(())
    }

    async fn generate_reply(&mut self, instructions: &str) -> Result<(), EngineError> {
        self.log.push(format!("reply:{instructions}"));
        if self.hang_reply {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.log.push("close");
        if self.fail_close {
            return Err(EngineError::Protocol("close failed".into()));
        }
        Ok(())
    }
}
