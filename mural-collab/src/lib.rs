//! # mural-collab — Real-time multi-room drawing and chat engine
//!
//! Provides WebSocket-based room synchronization: shared stroke canvases,
//! chat relay and live presence rosters, with best-effort persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RoomClient  │ ◄─────────────────► │ RoomServer  │
//! │ (per user)  │     Binary Proto    │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴──────┐
//!                                     │ RoomRegistry│
//!                                     │ code → Room │
//!                                     └──────┬──────┘
//!                                            │
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                       ┌───────────┐ ┌────────────┐ ┌───────────┐
//!                       │  roster   │ │  strokes   │ │ Broadcast │
//!                       │ (presence)│ │  (replay)  │ │  Group    │
//!                       └───────────┘ └────────────┘ └─────┬─────┘
//!                                                          │
//!                                            PersistenceBridge (async)
//!                                                          │
//!                                                     ┌────┴────┐
//!                                                     │RoomStore│
//!                                                     │(RocksDB)│
//!                                                     └─────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded frames)
//! - [`identity`] — Room codes and anonymous display names
//! - [`broadcast`] — Per-room fan-out with origin-scoped delivery
//! - [`room`] — Roster, stroke log and chat relay for one room
//! - [`registry`] — Live room map with create/ensure/retire
//! - [`server`] — WebSocket session gateway
//! - [`client`] — Protocol-level WebSocket client
//! - [`storage`] — RocksDB room store behind a fire-and-forget bridge

pub mod broadcast;
pub mod client;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, DeliveryScope, RoomFrame};
pub use client::{ConnectionState, RoomClient, RoomEvent};
pub use identity::{display_name, InvalidRoomCode, RoomCode, ROOM_CODE_LEN};
pub use protocol::{
    ChatEntry, ClientFrame, Point, ProtocolError, ServerFrame, Stroke, UserEntry,
};
pub use registry::RoomRegistry;
pub use room::{JoinSnapshot, LeaveOutcome, Participant, Room};
pub use server::{RoomServer, ServerConfig, ServerStats};
pub use storage::{PersistenceBridge, RoomRecord, RoomStore, StoreConfig, StoreError};
