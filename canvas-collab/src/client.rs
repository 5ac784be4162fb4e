//! WebSocket client for the drawing server.
//!
//! Provides:
//! - Connection lifecycle (connect, connection state)
//! - Room operations: create, join, leave, send strokes
//! - Decoded server events on a channel for the application

use std::sync::Arc;

use canvas_core::Diff;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEvent, ProtocolError, RoomId, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// An event pushed by the server
    Server(ServerEvent),
}

/// The drawing client.
pub struct CanvasClient {
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<CanvasEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<CanvasEvent>,

    /// Server URL
    server_url: String,
}

impl CanvasClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CanvasEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::WebSocket(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(CanvasEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(CanvasEvent::Server(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(CanvasEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. Pending sends are flushed first.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    async fn send(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let encoded = event.encode()?;
        match self.outgoing_tx {
            Some(ref tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn create_room(&self, room_id: impl Into<RoomId>) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CreateRoom { room_id: room_id.into() }).await
    }

    pub async fn join(&self, room_id: impl Into<RoomId>) -> Result<(), ProtocolError> {
        self.send(ClientEvent::Join { room_id: room_id.into() }).await
    }

    pub async fn leave(&self, room_id: impl Into<RoomId>) -> Result<(), ProtocolError> {
        self.send(ClientEvent::Leave { room_id: room_id.into() }).await
    }

    pub async fn send_stroke(
        &self,
        room_id: impl Into<RoomId>,
        diffs: Vec<Diff>,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::SendStroke { room_id: room_id.into(), diffs }).await
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
