//! Binary wire protocol for room synchronization.
//!
//! All frames are bincode-encoded and travel as WebSocket binary messages.
//!
//! ```text
//! Client ──ClientFrame──►  Server
//!   CreateRoom               │ RoomCreated { code }        (to caller)
//!   JoinRoom { code }        │ JoinAck { history, users }  (to caller)
//!   Draw { code, stroke }    │ Draw { stroke }             (room, not sender)
//!   ClearCanvas { code }     │ ClearCanvas                 (room, not sender)
//!   Chat { code, text }      │ Chat { entry }              (room, incl. sender)
//!                            │ UserList / UserJoined / UserLeft
//! Client ◄──ServerFrame──  Server
//! ```
//!
//! Chat timestamps are assigned server-side at receipt so every room has a
//! single ordering source.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 2D position on the drawing surface, in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One immutable drawn line segment.
///
/// Concatenated in insertion order, a room's strokes reconstruct the whole
/// canvas for a late joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub from: Point,
    pub to: Point,
    /// RGBA, each component in `[0, 1]`.
    pub color: [f32; 4],
    pub width: f32,
}

impl Stroke {
    pub fn new(from: Point, to: Point, color: [f32; 4], width: f32) -> Self {
        Self {
            from,
            to,
            color,
            width,
        }
    }
}

/// A chat message after server stamping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Display name of the author.
    pub user: String,
    pub text: String,
    /// Milliseconds since the Unix epoch, assigned at receipt.
    pub timestamp_ms: u64,
}

/// One roster element. Rosters are ordered by join time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub conn_id: Uuid,
    pub name: String,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Request a fresh room code. Does not join the room.
    CreateRoom,
    /// Join a room by code, creating it if absent (shared-link joins).
    JoinRoom { code: String },
    /// Append a stroke to the room the connection is in.
    Draw { code: String, stroke: Stroke },
    /// Reset the room's drawing history.
    ClearCanvas { code: String },
    /// Send a chat message to the room.
    Chat { code: String, text: String },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Response to `CreateRoom`.
    RoomCreated { code: String },
    /// Response to `JoinRoom`. On success carries the full draw history
    /// (replay) and the roster at the moment of the join.
    JoinAck {
        success: bool,
        user_name: String,
        draw_history: Vec<Stroke>,
        users: Vec<UserEntry>,
    },
    /// A live stroke from another participant.
    Draw { stroke: Stroke },
    /// Another participant cleared the canvas.
    ClearCanvas,
    /// A chat message, delivered to every member including the sender.
    Chat(ChatEntry),
    /// Full roster after any join or leave.
    UserList { users: Vec<UserEntry> },
    UserJoined { name: String },
    UserLeft { name: String },
}

impl ClientFrame {
    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

impl ServerFrame {
    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(frame)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
