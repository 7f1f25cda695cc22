//! Room metadata lookup.
//!
//! Room records (who hosts, how many seats, whether a game is on) are
//! owned by an external store. The server only needs three operations on
//! them, captured by [`RoomDirectory`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use nightfall_protocol::{RoomId, RoomStatus, UserId};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub host_id: UserId,
    /// Maximum number of players.
    pub capacity: usize,
    pub status: RoomStatus,
}

impl RoomRecord {
    pub fn new(room_id: RoomId, host_id: UserId, capacity: usize) -> Self {
        Self {
            room_id,
            host_id,
            capacity,
            status: RoomStatus::Waiting,
        }
    }
}

/// Source of room metadata.
///
/// Implementations must be cheap to call concurrently; the server calls
/// them while holding no locks of its own.
pub trait RoomDirectory: Send + Sync + 'static {
    fn room(&self, room_id: RoomId) -> impl Future<Output = Option<RoomRecord>> + Send;

    /// Returns `false` if the room does not exist.
    fn set_status(
        &self,
        room_id: RoomId,
        status: RoomStatus,
    ) -> impl Future<Output = bool> + Send;

    /// Returns `false` if the room did not exist.
    fn delete_room(&self, room_id: RoomId) -> impl Future<Output = bool> + Send;
}

/// A [`RoomDirectory`] kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    rooms: Arc<Mutex<HashMap<RoomId, RoomRecord>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rooms(records: impl IntoIterator<Item = RoomRecord>) -> Self {
        let rooms = records.into_iter().map(|r| (r.room_id, r)).collect();
        Self {
            rooms: Arc::new(Mutex::new(rooms)),
        }
    }

    /// Inserts or replaces a record.
    pub async fn insert(&self, record: RoomRecord) {
        self.rooms.lock().await.insert(record.room_id, record);
    }

    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.lock().await.is_empty()
    }
}

impl RoomDirectory for InMemoryDirectory {
    async fn room(&self, room_id: RoomId) -> Option<RoomRecord> {
        self.rooms.lock().await.get(&room_id).cloned()
    }

    async fn set_status(&self, room_id: RoomId, status: RoomStatus) -> bool {
        match self.rooms.lock().await.get_mut(&room_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    async fn delete_room(&self, room_id: RoomId) -> bool {
        self.rooms.lock().await.remove(&room_id).is_some()
    }
}
