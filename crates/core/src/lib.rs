//! Rumi Core
//!
//! Session orchestration for a voice-driven hospitality robot: keeps an
//! emotion indicator, on-screen overlays and a robot arm in step with a live
//! conversation, and exposes the actions the conversational model may call.
//!
//! The media transport and the conversational engine are black boxes behind
//! the [`transport::Transport`] and [`engine::ConversationEngine`] traits.

pub mod action_client;
pub mod cleanup;
pub mod emotion;
pub mod engine;
pub mod envelope;
pub mod orchestrator;
pub mod session;
pub mod side_channel;
pub mod tools;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use emotion::{ActiveSpeaker, EmotionState, EmotionTracker, SpeakerActivity};
pub use orchestrator::{SessionOrchestrator, SessionPhase, SessionSettings, SessionSummary};
pub use session::SessionHandle;
pub use side_channel::SideChannel;
pub use tools::{ToolDispatcher, ToolInvocation};
