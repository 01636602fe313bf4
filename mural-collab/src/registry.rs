//! Room registry: the server's authoritative map of live rooms.
//!
//! Reads dominate (every frame dispatch resolves a code), so the map sits
//! behind an `RwLock` and the write lock is taken only to create or remove
//! rooms. Room mutation itself never touches the registry lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::identity::RoomCode;
use crate::room::{JoinSnapshot, Participant, Room};

pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomCode, Arc<Room>>>,
    broadcast_capacity: usize,
}

impl RoomRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            broadcast_capacity,
        }
    }

    /// Mint a code no live room uses and register an empty room under it.
    pub async fn create_room(&self) -> (RoomCode, Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        // 36^6 codes; collisions are rare but not impossible once rooms
        // accumulate, so retry until the code is free.
        let code = loop {
            let candidate = RoomCode::generate();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let room = Arc::new(Room::new(code.clone(), self.broadcast_capacity));
        rooms.insert(code.clone(), room.clone());
        (code, room)
    }

    /// Fetch the room for `code`, creating it when absent. Returns the room
    /// and whether this call created it.
    pub async fn ensure_room(&self, code: &RoomCode) -> (Arc<Room>, bool) {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(code) {
                return (room.clone(), false);
            }
        }
        // Re-check under the write lock; another task may have won the race.
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(code) {
            return (room.clone(), false);
        }
        let room = Arc::new(Room::new(code.clone(), self.broadcast_capacity));
        rooms.insert(code.clone(), room.clone());
        (room, true)
    }

    /// Resolve `code` (creating the room when absent) and add the
    /// participant, atomically with respect to room retirement.
    ///
    /// Resolving and joining as two separate steps would leave a window
    /// where [`Self::remove_if_empty`] retires the room between them,
    /// stranding the joiner in a room the registry no longer maps — the
    /// next joiner would then get a second room under the same code. The
    /// roster insert therefore runs under the registry read lock, which
    /// excludes the write-locked removal; if the room vanished between
    /// resolution and the re-check, resolution is retried.
    ///
    /// Returns the room, whether this call created it, and the join
    /// snapshot.
    pub async fn join_room(
        &self,
        code: &RoomCode,
        participant: Participant,
    ) -> (Arc<Room>, bool, JoinSnapshot) {
        loop {
            let (room, created) = self.ensure_room(code).await;
            let rooms = self.rooms.read().await;
            match rooms.get(code) {
                Some(current) if Arc::ptr_eq(current, &room) => {
                    let snapshot = room.join(participant.clone()).await;
                    return (room, created, snapshot);
                }
                // Lost a race with removal; resolve again.
                _ => continue,
            }
        }
    }

    pub async fn get(&self, code: &RoomCode) -> Option<Arc<Room>> {
        self.rooms.read().await.get(code).cloned()
    }

    /// Drop the room if it is still empty. The emptiness check runs under
    /// the write lock, so a join racing this call keeps the room alive.
    pub async fn remove_if_empty(&self, code: &RoomCode) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(code) else {
            return false;
        };
        if !room.is_empty().await {
            return false;
        }
        rooms.remove(code);
        true
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_codes(&self) -> Vec<RoomCode> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
