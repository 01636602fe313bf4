//! WebSocket session gateway with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (code) ── roster + strokes ── BroadcastGroup
//! Client B ──┘                        │
//!                                     ├── PersistenceBridge (mpsc)
//!                                     │       │
//!                                     │       └── RoomStore (RocksDB)
//!                                     │
//!                          ┌──────────┼───────────┐
//!                          ▼          ▼           ▼
//!                       Client A   Client B    Client C
//! ```
//!
//! Each connection is one spawned task owning both halves of the socket:
//! inbound client frames and the room's broadcast stream are multiplexed
//! with `select!`. A connection is in at most one room; joining another
//! room leaves the current one first.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 8

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::RoomFrame;
use crate::identity::{self, RoomCode};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::RoomRegistry;
use crate::room::{Participant, Room};
use crate::storage::{PersistenceBridge, RoomStore, StoreConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

/// The room server.
pub struct RoomServer {
    config: ServerConfig,
    /// Live rooms by code
    registry: Arc<RoomRegistry>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
    /// Durable room store (optional)
    store: Option<Arc<RoomStore>>,
}

/// The room a connection currently belongs to.
struct Session {
    code: RoomCode,
    room: Arc<Room>,
}

impl RoomServer {
    /// Create a new room server with the given configuration.
    ///
    /// A store that fails to open is logged and skipped: persistence is
    /// best-effort and must never keep rooms from running.
    pub fn new(config: ServerConfig) -> Self {
        let store = config.storage_path.as_ref().and_then(|path| {
            let store_config = StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            };
            match RoomStore::open(store_config) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    log::error!("Failed to open room store at {}: {e}", path.display());
                    None
                }
            }
        });

        Self {
            registry: Arc::new(RoomRegistry::new(config.broadcast_capacity)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
            store,
            config,
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let config = ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        };
        Self::new(config)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let bridge = self.store.clone().map(PersistenceBridge::spawn);

        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Room server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let bridge = bridge.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, bridge).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        bridge: Option<PersistenceBridge>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn_id = Uuid::new_v4();
        let user_name = identity::display_name(conn_id);
        log::info!("{user_name} ({conn_id}) connected from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // State for this connection
        let mut session: Option<Session> = None;
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<RoomFrame>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let frame = match ClientFrame::decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {user_name}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match frame {
                                ClientFrame::CreateRoom => {
                                    // Mint a room without joining it; the client
                                    // follows up with an explicit JoinRoom.
                                    let (code, room) = registry.create_room().await;
                                    if let Some(ref b) = bridge {
                                        b.upsert_room(&code, room.created_at_ms());
                                    }
                                    log::info!("{user_name} created room {code}");

                                    let response = ServerFrame::RoomCreated {
                                        code: code.to_string(),
                                    };
                                    ws_sender.send(Message::Binary(response.encode()?.into())).await?;

                                    let mut s = stats.write().await;
                                    s.active_rooms = registry.room_count().await;
                                }

                                ClientFrame::JoinRoom { code } => {
                                    let code = match RoomCode::parse(&code) {
                                        Ok(code) => code,
                                        Err(e) => {
                                            log::debug!("{user_name} sent bad join: {e}");
                                            let nack = ServerFrame::JoinAck {
                                                success: false,
                                                user_name: user_name.clone(),
                                                draw_history: Vec::new(),
                                                users: Vec::new(),
                                            };
                                            ws_sender.send(Message::Binary(nack.encode()?.into())).await?;
                                            continue;
                                        }
                                    };

                                    // One room per connection: leave the current
                                    // room before entering the next.
                                    if let Some(previous) = session.take() {
                                        broadcast_rx = None;
                                        Self::depart(conn_id, &previous, &registry, &bridge).await;
                                    }

                                    // Resolve and join in one registry step so a
                                    // concurrent retirement cannot strand us in an
                                    // unregistered room.
                                    let (room, created, snapshot) = registry
                                        .join_room(&code, Participant::new(conn_id, user_name.clone()))
                                        .await;
                                    if created {
                                        if let Some(ref b) = bridge {
                                            b.upsert_room(&code, room.created_at_ms());
                                        }
                                    }
                                    log::info!("{user_name} joined room {code}");

                                    let ack = ServerFrame::JoinAck {
                                        success: true,
                                        user_name: user_name.clone(),
                                        draw_history: snapshot.draw_history,
                                        users: snapshot.roster,
                                    };
                                    // Ack first: the client sees the snapshot
                                    // before any live frame from the receiver.
                                    ws_sender.send(Message::Binary(ack.encode()?.into())).await?;

                                    broadcast_rx = Some(snapshot.receiver);
                                    session = Some(Session { code, room });

                                    let mut s = stats.write().await;
                                    s.active_rooms = registry.room_count().await;
                                }

                                ClientFrame::Draw { code, stroke } => {
                                    match Self::room_for(&session, &code) {
                                        Some(room) => room.append_stroke(conn_id, stroke).await,
                                        None => log::debug!(
                                            "{user_name} sent Draw for room {code} they are not in"
                                        ),
                                    }
                                }

                                ClientFrame::ClearCanvas { code } => {
                                    match Self::room_for(&session, &code) {
                                        Some(room) => room.clear_canvas(conn_id).await,
                                        None => log::debug!(
                                            "{user_name} sent ClearCanvas for room {code} they are not in"
                                        ),
                                    }
                                }

                                ClientFrame::Chat { code, text } => {
                                    match Self::room_for(&session, &code) {
                                        Some(room) => {
                                            let entry =
                                                room.relay_chat(conn_id, &user_name, text).await;
                                            if let (Some(b), Some(s)) = (&bridge, &session) {
                                                b.append_chat(&s.code, entry);
                                            }
                                        }
                                        None => log::debug!(
                                            "{user_name} sent Chat for room {code} they are not in"
                                        ),
                                    }
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("{user_name} disconnected");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {user_name}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast frame
                frame = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // Not in a room — wait forever
                        std::future::pending().await
                    }
                } => {
                    match frame {
                        Ok(frame) => {
                            if !frame.is_for(conn_id) {
                                continue; // Skip frames scoped away from us
                            }
                            ws_sender.send(Message::Binary(frame.payload.to_vec().into())).await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("{user_name} lagged by {n} frames");
                        }
                        Err(_) => {
                            broadcast_rx = None;
                        }
                    }
                }
            }
        }

        // Cleanup: remove from the current room, drop the room when empty
        if let Some(current) = session.take() {
            Self::depart(conn_id, &current, &registry, &bridge).await;
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_rooms = registry.room_count().await;

        Ok(())
    }

    /// Resolve a frame's room code against the connection's session.
    /// Frames for rooms the connection is not in are dropped by the caller.
    fn room_for(session: &Option<Session>, code: &str) -> Option<Arc<Room>> {
        let current = session.as_ref()?;
        let code = RoomCode::parse(code).ok()?;
        (current.code == code).then(|| current.room.clone())
    }

    /// Leave a room and retire it if that left it empty. The durable
    /// record is only marked inactive, never deleted.
    async fn depart(
        conn_id: Uuid,
        session: &Session,
        registry: &RoomRegistry,
        bridge: &Option<PersistenceBridge>,
    ) {
        let outcome = session.room.leave(conn_id).await;
        if outcome.now_empty && registry.remove_if_empty(&session.code).await {
            if let Some(b) = bridge {
                b.mark_inactive(&session.code);
            }
            log::info!("Room {} removed (empty)", session.code);
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the live room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Get the durable store (if configured).
    pub fn store(&self) -> Option<&Arc<RoomStore>> {
        self.store.as_ref()
    }
}
