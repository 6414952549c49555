//! The single active-session slot.
//!
//! Tool handlers need the live side channel without the engine passing it
//! through every call. The orchestrator binds the slot when a session goes
//! active and the returned guard clears it again, on every exit path.

use crate::side_channel::SideChannel;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Shared handle to the currently active session, if any.
#[derive(Clone, Default)]
pub struct SessionHandle {
    slot: Arc<Mutex<Option<ActiveSession>>>,
    generation: Arc<AtomicU64>,
}

#[derive(Clone)]
struct ActiveSession {
    generation: u64,
    room: String,
    side_channel: SideChannel,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `room` as the active session until the returned binding drops.
    pub fn bind(&self, room: impl Into<String>, side_channel: SideChannel) -> SessionBinding {
        let room = room.into();
        debug!(%room, "Binding active session");
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *self.lock() = Some(ActiveSession {
            generation,
            room,
            side_channel,
        });
        SessionBinding {
            handle: self.clone(),
            generation,
        }
    }

    /// Clears the slot. Safe to call when nothing is bound.
    pub fn clear(&self) {
        if let Some(previous) = self.lock().take() {
            debug!(room = %previous.room, "Cleared active session");
        }
    }

    /// The side channel of the active session, or `None` between sessions.
    pub fn side_channel(&self) -> Option<SideChannel> {
        self.lock().as_ref().map(|s| s.side_channel.clone())
    }

    pub fn room(&self) -> Option<String> {
        self.lock().as_ref().map(|s| s.room.clone())
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scope guard returned by [`SessionHandle::bind`].
#[must_use = "the session is cleared as soon as the binding is dropped"]
pub struct SessionBinding {
    handle: SessionHandle,
    generation: u64,
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        // A stale binding must not clear a session bound after it.
        let mut slot = self.handle.lock();
        if slot.as_ref().is_some_and(|s| s.generation == self.generation) {
            *slot = None;
        }
    }
}
