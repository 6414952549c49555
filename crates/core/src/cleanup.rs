//! Startup cleanup of stale rooms.
//!
//! A crashed worker can leave rooms behind that still hold the UI. Before
//! serving anything the agent deletes rooms whose name matches a pattern.
//! This pass is best-effort: nothing here may stop startup.

use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("admin request failed: {0}")]
    Request(String),
    #[error("admin API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to sign admin token: {0}")]
    Token(String),
}

/// Administrative access to the rooms of the transport server.
#[async_trait]
pub trait RoomAdmin: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<String>, AdminError>;
    async fn delete_room(&self, name: &str) -> Result<(), AdminError>;
}

/// Deletes every room whose lowercase name contains `pattern`.
///
/// Returns the number of rooms deleted. Failures are logged and skipped.
pub async fn cleanup_stale_rooms(admin: &dyn RoomAdmin, pattern: &str) -> usize {
    let pattern = pattern.to_lowercase();
    let rooms = match admin.list_rooms().await {
        Ok(rooms) => rooms,
        Err(e) => {
            warn!(error = %e, "Room cleanup failed (non-fatal)");
            return 0;
        }
    };

    let mut deleted = 0;
    for room in rooms.iter().filter(|r| r.to_lowercase().contains(&pattern)) {
        info!(%room, "Cleaning up old room");
        match admin.delete_room(room).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(%room, error = %e, "Failed to delete stale room"),
        }
    }
    info!(deleted, "Room cleanup complete");
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAdmin {
        rooms: Vec<String>,
        fail_list: bool,
        fail_delete: Vec<String>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RoomAdmin for FakeAdmin {
        async fn list_rooms(&self) -> Result<Vec<String>, AdminError> {
            if self.fail_list {
                return Err(AdminError::Request("unreachable".into()));
            }
            Ok(self.rooms.clone())
        }

        async fn delete_room(&self, name: &str) -> Result<(), AdminError> {
            if self.fail_delete.iter().any(|r| r == name) {
                return Err(AdminError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.deleted.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deletes_matching_rooms_case_insensitively() {
        let admin = FakeAdmin {
            rooms: vec!["Rummi-1".into(), "lobby".into(), "old-rummi".into()],
            ..Default::default()
        };

        let deleted = cleanup_stale_rooms(&admin, "rummi").await;

        assert_eq!(deleted, 2);
        assert_eq!(*admin.deleted.lock().unwrap(), vec!["Rummi-1", "old-rummi"]);
    }

    #[tokio::test]
    async fn test_list_failure_is_swallowed() {
        let admin = FakeAdmin {
            fail_list: true,
            ..Default::default()
        };
        assert_eq!(cleanup_stale_rooms(&admin, "rummi").await, 0);
    }

    #[tokio::test]
    async fn test_delete_failure_continues_with_remaining_rooms() {
        let admin = FakeAdmin {
            rooms: vec!["rummi-a".into(), "rummi-b".into()],
            fail_delete: vec!["rummi-a".into()],
            ..Default::default()
        };

        assert_eq!(cleanup_stale_rooms(&admin, "RUMMI").await, 1);
        assert_eq!(*admin.deleted.lock().unwrap(), vec!["rummi-b"]);
    }
}
