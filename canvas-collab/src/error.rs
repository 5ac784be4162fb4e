use canvas_core::BoardError;
use thiserror::Error;

use crate::protocol::{MemberId, RoomId};

/// Errors raised by the room, registry and gateway layers.
///
/// Every variant except `UnknownMember` and `OutboxFull` maps to a client-visible event in
/// [`crate::gateway::error_event`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollabError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("Room already exists: {0}")]
    DuplicateRoom(RoomId),
    #[error("Member has not joined room {0}")]
    NotJoined(RoomId),
    #[error("Unknown member: {0}")]
    UnknownMember(MemberId),
    #[error("Outbox of {0} is full")]
    OutboxFull(MemberId),
}
