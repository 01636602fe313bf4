//! Durable storage: RocksDB room store plus the async write bridge.

pub mod bridge;
pub mod rocks;

pub use bridge::PersistenceBridge;
pub use rocks::{RoomRecord, RoomStore, StoreConfig, StoreError};
