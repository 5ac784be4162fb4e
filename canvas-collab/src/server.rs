//! WebSocket server fronting the session gateway.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── Room "r1" ── Board
//!            ├── Gateway ── Registry ┤
//! Client B ──┘                       └── Room "r2" ── Board
//!     ▲                                      │
//!     └──────────── outbox (mpsc) ◄──────────┘
//! ```
//!
//! Each connection task owns the socket. Incoming text frames are decoded
//! into [`ClientEvent`]s and dispatched; everything the gateway queues for
//! the member is written back in order. A member whose bounded outbox
//! overflows has been evicted from its rooms, and its socket is closed.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use canvas_core::DiffPolicy;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::error::CollabError;
use crate::gateway::{Gateway, MemberConnection};
use crate::protocol::{ClientEvent, MemberId, RoomId, ServerEvent};
use crate::registry::{RoomRegistry, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::room::DEFAULT_OUTBOX_CAPACITY;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Width of every new room's board
    pub board_width: usize,
    /// Height of every new room's board
    pub board_height: usize,
    /// What to do with diffs whose coordinate is off the board
    pub diff_policy: DiffPolicy,
    /// Undelivered events a member may have queued before it is dropped
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            board_width: DEFAULT_WIDTH,
            board_height: DEFAULT_HEIGHT,
            diff_policy: DiffPolicy::Skip,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub strokes_committed: u64,
    pub active_rooms: usize,
}

/// The drawing server.
pub struct CanvasServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CanvasServer {
    /// Create a server. Fails if the configured board size is unusable.
    pub fn new(config: ServerConfig) -> Result<Self, CollabError> {
        let registry = RoomRegistry::new(config.board_width, config.board_height)?;
        let gateway = Gateway::new(Arc::new(registry), config.diff_policy)
            .with_outbox_capacity(config.outbox_capacity);
        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        let config = ServerConfig::default();
        let gateway = Gateway::new(Arc::new(RoomRegistry::with_defaults()), config.diff_policy)
            .with_outbox_capacity(config.outbox_capacity);
        Self {
            config,
            gateway: Arc::new(gateway),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Canvas server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let gateway = self.gateway.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, gateway, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        gateway: Arc<Gateway>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let MemberConnection { member_id, mut events } = gateway.connect().await;
        log::info!("WebSocket connection established from {addr} as {member_id}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut joined: HashSet<RoomId> = HashSet::new();

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += text.len() as u64;
                                }
                                match ClientEvent::decode(text.as_str()) {
                                    Ok(event) => {
                                        Self::handle_event(&gateway, &stats, member_id, event, &mut joined)
                                            .await;
                                    }
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                        gateway
                                            .send_to(&member_id, ServerEvent::ProtocolError(e.to_string()))
                                            .await;
                                    }
                                }
                            }

                            Some(Ok(Message::Binary(_))) => {
                                let reply = ServerEvent::ProtocolError("Binary frames are not supported".into());
                                gateway.send_to(&member_id, reply).await;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    event = events.recv() => {
                        match event {
                            Some(event) => {
                                let text = event.encode()?;
                                ws_sender.send(Message::Text(text.into())).await?;
                            }
                            None => {
                                if events.is_overflowed() {
                                    log::warn!("{member_id} at {addr} fell behind; closing connection");
                                    ws_sender.send(Message::Close(None)).await?;
                                }
                                break;
                            }
                        }
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        // Cleanup: leave every room this connection is still in, then forget it.
        for room_id in joined.drain() {
            match gateway.dispatch(member_id, ClientEvent::Leave { room_id }).await {
                Ok(()) | Err(CollabError::RoomNotFound(_)) => {}
                Err(e) => log::debug!("Cleanup leave for {member_id} failed: {e}"),
            }
        }
        gateway.disconnect(&member_id).await;

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
        }

        result
    }

    async fn handle_event(
        gateway: &Gateway,
        stats: &RwLock<ServerStats>,
        member_id: MemberId,
        event: ClientEvent,
        joined: &mut HashSet<RoomId>,
    ) {
        // Failures already reached the member as error events.
        let room_id = event.room_id().clone();
        match event {
            ClientEvent::Join { .. } => {
                if gateway.dispatch(member_id, event).await.is_ok() {
                    joined.insert(room_id);
                }
            }
            ClientEvent::Leave { .. } => {
                joined.remove(&room_id);
                let _ = gateway.dispatch(member_id, event).await;
            }
            ClientEvent::SendStroke { .. } => {
                if gateway.dispatch(member_id, event).await.is_ok() {
                    stats.write().await.strokes_committed += 1;
                }
            }
            ClientEvent::CreateRoom { .. } => {
                let _ = gateway.dispatch(member_id, event).await;
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.gateway.registry().room_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Session gateway shared by every connection.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }
}
