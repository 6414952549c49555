//! The conversational engine, seen from the orchestrator.
//!
//! Speech recognition and generation happen inside the engine. The
//! orchestrator only constructs it with the tool catalog, starts it, steers
//! the first reply and closes it.

use crate::tools::ToolDispatcher;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Credentials for the configured provider are absent. Fatal.
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("failed to connect to engine: {0}")]
    Connect(String),
    #[error("engine protocol error: {0}")]
    Protocol(String),
    #[error("engine session is not running")]
    NotRunning,
}

impl EngineError {
    /// Whether this error means no session can ever be built.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::MissingCredentials(_))
    }
}

/// Everything an engine needs to build a session.
#[derive(Clone)]
pub struct EngineSessionConfig {
    /// Persona and behavior instructions.
    pub instructions: String,
    /// The room the engine session is bound to.
    pub room: String,
    /// Tool calls from the model are routed here; the returned sentence is
    /// the tool's result value.
    pub dispatcher: Arc<ToolDispatcher>,
}

/// A running conversation with the model.
#[async_trait]
pub trait ConversationEngine: Send {
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Asks the model to speak next, steered by `instructions`.
    async fn generate_reply(&mut self, instructions: &str) -> Result<(), EngineError>;

    /// Stops the session. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// Builds engine sessions for the configured provider.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        config: EngineSessionConfig,
    ) -> Result<Box<dyn ConversationEngine>, EngineError>;
}
