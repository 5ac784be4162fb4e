//! # canvas-collab — Real-time shared drawing rooms
//!
//! Clients join named rooms, each holding one authoritative board. A stroke
//! sent to a room is applied to its board and broadcast to every member;
//! late joiners receive the whole board first.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ CanvasClient │ ◄────────────────► │ CanvasServer │
//! │ (per user)   │     JSON events    │ (central)    │
//! └──────────────┘                    └──────┬───────┘
//!                                            │
//!                                     ┌──────┴───────┐
//!                                     │   Gateway    │
//!                                     │ join / leave │
//!                                     │ send-stroke  │
//!                                     └──────┬───────┘
//!                                            │
//!                                     ┌──────┴───────┐
//!                                     │ RoomRegistry │
//!                                     └──────┬───────┘
//!                                     ┌──────┴───────┐
//!                                     │ Room (lock)  │
//!                                     │    Board     │
//!                                     │   fan-out    │
//!                                     └──────┬───────┘
//!                                            │ bounded
//!                                     ┌──────┴───────┐
//!                                     │   Outboxes   │
//!                                     │ (per member) │
//!                                     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire events and identifiers
//! - [`room`] — One board plus its members, under a per-room lock
//! - [`registry`] — Process-wide room directory with purge-on-empty
//! - [`gateway`] — Session handling, transport independent
//! - [`server`] — WebSocket server
//! - [`client`] — WebSocket client

pub mod error;
pub mod protocol;
pub mod room;
pub mod registry;
pub mod gateway;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use error::CollabError;
pub use protocol::{ClientEvent, MemberId, ProtocolError, RoomId, ServerEvent};
pub use room::{Departure, Inbox, Outbox, Room, RoomStats, StrokeReceipt, Undelivered, DEFAULT_OUTBOX_CAPACITY};
pub use registry::RoomRegistry;
pub use gateway::{error_event, Gateway, MemberConnection};
pub use server::{BoxError, CanvasServer, ServerConfig, ServerStats};
pub use client::{CanvasClient, CanvasEvent, ConnectionState};
