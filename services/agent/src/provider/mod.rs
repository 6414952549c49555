//! Realtime conversation engines for the supported providers.
//!
//! Each engine holds a WebSocket to the provider, runs it in a background task
//! and routes the model's function calls to the session's tool dispatcher.
//!
//! Only the control plane goes through these sockets: instructions, the
//! greeting, tool calls and their replies. No room audio is forwarded to the
//! provider and audio the model produces is discarded, so the engines steer
//! the conversation but do not carry it.

#[cfg(test)]
pub(crate) mod fake_realtime;
pub mod gemini;
pub mod openai;

use crate::config::{Config, Provider};
use rumi_core::engine::{ConversationEngine, EngineError, EngineFactory, EngineSessionConfig};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::client::IntoClientRequest,
};
use tracing::info;

/// Upper bound on the provider WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) type ProviderSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the provider WebSocket, failing with `Connect` if the handshake
/// takes longer than `limit`.
pub(crate) async fn connect_within<R>(
    request: R,
    limit: Duration,
) -> Result<ProviderSocket, EngineError>
where
    R: IntoClientRequest + Unpin,
{
    match tokio::time::timeout(limit, connect_async(request)).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(e)) => Err(EngineError::Connect(e.to_string())),
        Err(_) => Err(EngineError::Connect(format!("handshake timed out after {limit:?}"))),
    }
}

/// Provider-level settings shared by every engine session.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub temperature: f32,
    /// Overrides the provider's WebSocket endpoint.
    pub endpoint: Option<String>,
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        let api_key = match config.provider {
            Provider::OpenAI => config.openai_api_key.clone(),
            Provider::Gemini => config.gemini_api_key.clone(),
        };
        Self {
            provider: config.provider.clone(),
            api_key,
            model: config.model.clone(),
            voice: config.voice.clone(),
            temperature: config.temperature,
            endpoint: None,
        }
    }

    fn credential_name(&self) -> &'static str {
        match self.provider {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Builds engine sessions for the configured provider.
pub struct ProviderEngineFactory {
    settings: ProviderSettings,
}

impl ProviderEngineFactory {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

impl EngineFactory for ProviderEngineFactory {
    fn create(
        &self,
        config: EngineSessionConfig,
    ) -> Result<Box<dyn ConversationEngine>, EngineError> {
        let api_key = self
            .settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                EngineError::MissingCredentials(self.settings.credential_name().to_string())
            })?;

        info!(provider = ?self.settings.provider, model = %self.settings.model, room = %config.room, "Creating engine session.");
        let engine: Box<dyn ConversationEngine> = match self.settings.provider {
            Provider::OpenAI => Box::new(openai::OpenAIEngine::new(
                self.settings.clone(),
                api_key,
                config,
            )),
            Provider::Gemini => Box::new(gemini::GeminiEngine::new(
                self.settings.clone(),
                api_key,
                config,
            )),
        };
        Ok(engine)
    }
}
