//! JSON event protocol spoken over the WebSocket.
//!
//! Wire format (one text frame per event):
//! ```text
//! {"event": "send-stroke", "data": {"room_id": "r1", "diffs": [{"coord": 0, "val": 100}]}}
//! {"event": "broadcast-stroke", "data": {"diffs": [{"coord": 0, "val": 100}]}}
//! {"event": "invalid-room", "data": "Room with given ID not found"}
//! ```
//!
//! Event names are kebab-case; payload fields stay snake_case.

use std::fmt;

use canvas_core::{BoardSnapshot, Diff};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Message sent with `invalid-room`.
pub const ROOM_NOT_FOUND: &str = "Room with given ID not found";
/// Message sent with `room-conflict`.
pub const ROOM_EXISTS: &str = "Room with given ID already exists";
/// Message sent with `not-joined`.
pub const NOT_JOINED: &str = "Join the room before drawing on it";

/// Caller-supplied room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of one connected client, assigned by the gateway on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member#{}", self.0)
    }
}

/// Events a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Join { room_id: RoomId },
    SendStroke { room_id: RoomId, diffs: Vec<Diff> },
    Leave { room_id: RoomId },
    /// Administrative: register a new empty room under a caller-chosen id.
    CreateRoom { room_id: RoomId },
}

impl ClientEvent {
    /// Room the event is addressed to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Join { room_id }
            | Self::SendStroke { room_id, .. }
            | Self::Leave { room_id }
            | Self::CreateRoom { room_id } => room_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Events the server delivers to a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full board, sent only to the member that just joined.
    InitializeBoard { board: BoardSnapshot },
    /// A stroke exactly as received, sent to every member of the room.
    BroadcastStroke { diffs: Vec<Diff> },
    InvalidRoom(String),
    NotJoined(String),
    InvalidStroke(String),
    RoomCreated { room_id: RoomId },
    RoomConflict(String),
    /// The server could not parse a frame.
    ProtocolError(String),
    Error(String),
}

impl ServerEvent {
    pub fn invalid_room() -> Self {
        Self::InvalidRoom(ROOM_NOT_FOUND.to_string())
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}
