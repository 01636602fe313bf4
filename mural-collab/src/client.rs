//! WebSocket client for connecting to the room server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Room creation and joining
//! - Stroke, clear and chat sends with server frames surfaced as events
//!
//! The client is protocol-level: it owns no canvas. Applications drain
//! [`RoomEvent`]s and render however they like; the integration tests use
//! it as their harness.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ChatEntry, ClientFrame, ProtocolError, ServerFrame, Stroke, UserEntry};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the room client.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Server minted a room for us
    RoomCreated { code: String },
    /// We are in the room; snapshot of what is already there
    Joined {
        user_name: String,
        draw_history: Vec<Stroke>,
        users: Vec<UserEntry>,
    },
    /// Join refused (malformed code)
    JoinRejected,
    /// A remote participant drew a stroke
    Draw(Stroke),
    /// A remote participant cleared the canvas
    CanvasCleared,
    /// A chat message (our own included)
    Chat(ChatEntry),
    /// Full roster after a join or leave
    UserList(Vec<UserEntry>),
    UserJoined { name: String },
    UserLeft { name: String },
}

/// The room client.
///
/// Manages one WebSocket connection to the room server and translates
/// server frames into application events.
pub struct RoomClient {
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to send messages to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<RoomEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<RoomEvent>,

    /// Server URL
    server_url: String,
}

impl RoomClient {
    /// Create a new room client.
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
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RoomEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (ws_writer, mut ws_reader) = futures_util::StreamExt::split(ws_stream);

                // Outgoing message channel
                let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing channel to WebSocket
                let ws_writer = Arc::new(tokio::sync::Mutex::new(ws_writer));
                let writer = ws_writer.clone();
                tokio::spawn(async move {
                    while let Some(msg) = out_rx.recv().await {
                        let closing = matches!(msg, Message::Close(_));
                        let mut w = writer.lock().await;
                        use futures_util::SinkExt;
                        if w.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                });

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(RoomEvent::Connected).await;

                // Reader task: translate server frames into events
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                if let Ok(frame) = ServerFrame::decode(&bytes) {
                                    let event = match frame {
                                        ServerFrame::RoomCreated { code } => {
                                            RoomEvent::RoomCreated { code }
                                        }
                                        ServerFrame::JoinAck {
                                            success: true,
                                            user_name,
                                            draw_history,
                                            users,
                                        } => RoomEvent::Joined {
                                            user_name,
                                            draw_history,
                                            users,
                                        },
                                        ServerFrame::JoinAck { success: false, .. } => {
                                            RoomEvent::JoinRejected
                                        }
                                        ServerFrame::Draw { stroke } => RoomEvent::Draw(stroke),
                                        ServerFrame::ClearCanvas => RoomEvent::CanvasCleared,
                                        ServerFrame::Chat(entry) => RoomEvent::Chat(entry),
                                        ServerFrame::UserList { users } => {
                                            RoomEvent::UserList(users)
                                        }
                                        ServerFrame::UserJoined { name } => {
                                            RoomEvent::UserJoined { name }
                                        }
                                        ServerFrame::UserLeft { name } => {
                                            RoomEvent::UserLeft { name }
                                        }
                                    };
                                    let _ = event_tx.send(event).await;
                                }
                            }
                            Ok(Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(RoomEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Ask the server for a fresh room. Await [`RoomEvent::RoomCreated`].
    pub async fn create_room(&self) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::CreateRoom).await
    }

    /// Join a room by code. Await [`RoomEvent::Joined`] or
    /// [`RoomEvent::JoinRejected`].
    pub async fn join_room(&self, code: impl Into<String>) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::JoinRoom { code: code.into() })
            .await
    }

    /// Send a stroke to the room we are in.
    pub async fn send_stroke(
        &self,
        code: impl Into<String>,
        stroke: Stroke,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::Draw {
            code: code.into(),
            stroke,
        })
        .await
    }

    /// Clear the room's canvas.
    pub async fn clear_canvas(&self, code: impl Into<String>) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::ClearCanvas { code: code.into() })
            .await
    }

    /// Send a chat message. The stamped entry comes back as
    /// [`RoomEvent::Chat`], to us as well as everyone else.
    pub async fn send_chat(
        &self,
        code: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        self.send_frame(&ClientFrame::Chat {
            code: code.into(),
            text: text.into(),
        })
        .await
    }

    /// Close the connection. The server treats this like any other
    /// disconnect: we leave our room and peers are notified.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }

        let encoded = frame.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(Message::Binary(encoded.into()))
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
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
