//! Rumi Agent Library Crate
//!
//! Everything the agent service wires together around `rumi-core`: the
//! environment configuration, the WebSocket room relay, the realtime engine
//! adapters, the room-admin client and prompt loading. The `agent` binary is
//! a thin wrapper around this library.

pub mod admin;
pub mod config;
pub mod prompts;
pub mod provider;
pub mod relay;
pub mod router;
