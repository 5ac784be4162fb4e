//! Process-wide directory of live rooms.
//!
//! The registry lock only guards the `room_id → Room` map. Board mutation is
//! serialized by each room's own lock, so unrelated rooms never contend.
//! Lock order is always registry first, then room.

use std::collections::HashMap;
use std::sync::Arc;

use canvas_core::{Board, Diff, DiffPolicy};
use tokio::sync::RwLock;

use crate::error::CollabError;
use crate::protocol::RoomId;
use crate::room::{Room, StrokeReceipt};

/// Default board width for rooms created through the registry.
pub const DEFAULT_WIDTH: usize = 500;
/// Default board height for rooms created through the registry.
pub const DEFAULT_HEIGHT: usize = 500;

/// Maps room ids to rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    board_width: usize,
    board_height: usize,
}

impl RoomRegistry {
    /// Create an empty registry whose rooms get `width * height` boards.
    pub fn new(board_width: usize, board_height: usize) -> Result<Self, CollabError> {
        Board::cell_count(board_width, board_height)?;
        Ok(Self {
            rooms: RwLock::new(HashMap::new()),
            board_width,
            board_height,
        })
    }

    /// Registry with [`DEFAULT_WIDTH`] x [`DEFAULT_HEIGHT`] boards.
    pub fn with_defaults() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            board_width: DEFAULT_WIDTH,
            board_height: DEFAULT_HEIGHT,
        }
    }

    pub fn board_dimensions(&self) -> (usize, usize) {
        (self.board_width, self.board_height)
    }

    /// Register a room under `room_id`. An existing room is left untouched.
    pub async fn add_room(&self, room_id: RoomId, room: Room) -> Result<Arc<Room>, CollabError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room_id) {
            return Err(CollabError::DuplicateRoom(room_id));
        }
        let room = Arc::new(room);
        rooms.insert(room_id.clone(), room.clone());
        log::info!("Room {room_id} created ({} active)", rooms.len());
        Ok(room)
    }

    /// Create an empty room with the configured board size.
    pub async fn create_room(&self, room_id: RoomId) -> Result<Arc<Room>, CollabError> {
        let board = Board::new(self.board_width, self.board_height)?;
        self.add_room(room_id.clone(), Room::new(room_id, board)).await
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<Arc<Room>, CollabError> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| CollabError::RoomNotFound(room_id.clone()))
    }

    /// Remove and close a room. Its members are dropped without notice.
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<Arc<Room>, CollabError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .remove(room_id)
            .ok_or_else(|| CollabError::RoomNotFound(room_id.clone()))?;
        let dropped = room.close().await;
        log::info!("Room {room_id} deleted ({dropped} members dropped)");
        Ok(room)
    }

    /// Purge `room` if it is still the registered room for its id and has no
    /// members. A member that joined in the meantime keeps the room alive.
    pub async fn remove_if_empty(&self, room: &Arc<Room>) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(room.id()) {
            Some(current) if Arc::ptr_eq(current, room) => {}
            _ => return false,
        }
        if !room.close_if_empty().await {
            return false;
        }
        rooms.remove(room.id());
        log::info!("Room {} removed (empty)", room.id());
        true
    }

    /// Apply a stroke on behalf of the server and broadcast it to the room.
    pub async fn update_room_board(
        &self,
        room_id: &RoomId,
        diffs: Vec<Diff>,
        policy: DiffPolicy,
    ) -> Result<StrokeReceipt, CollabError> {
        let room = self.get_room(room_id).await?;
        let receipt = room.broadcast_stroke(diffs, policy).await?;
        if receipt.now_empty {
            self.remove_if_empty(&room).await;
        }
        Ok(receipt)
    }

    /// All active room ids, sorted.
    pub async fn get_rooms(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Administrative reset: close and forget every room.
    pub async fn clear(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let count = rooms.len();
        for (_, room) in rooms.drain() {
            room.close().await;
        }
        log::info!("Registry cleared ({count} rooms)");
        count
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
