//! Fire-and-forget bridge between the real-time path and the store.
//!
//! Session tasks enqueue write ops on an unbounded channel; a single
//! detached task drains it and applies each op. Store failures are logged
//! and swallowed — persistence is best-effort and must never stall or fail
//! a live room.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::identity::RoomCode;
use crate::protocol::ChatEntry;
use crate::storage::rocks::RoomStore;

/// One queued store write.
#[derive(Debug)]
enum StoreOp {
    UpsertRoom { code: RoomCode, created_at_ms: u64 },
    AppendChat { code: RoomCode, entry: ChatEntry },
    MarkInactive { code: RoomCode },
}

/// Handle for enqueueing store writes. Cheap to clone per session.
#[derive(Clone)]
pub struct PersistenceBridge {
    tx: mpsc::UnboundedSender<StoreOp>,
}

impl PersistenceBridge {
    /// Spawn the writer task. Must be called within a tokio runtime.
    ///
    /// The task exits when every bridge handle has been dropped.
    pub fn spawn(store: Arc<RoomStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                Self::apply(&store, op);
            }
            log::debug!("Persistence bridge drained, writer exiting");
        });
        Self { tx }
    }

    fn apply(store: &RoomStore, op: StoreOp) {
        match op {
            StoreOp::UpsertRoom {
                code,
                created_at_ms,
            } => {
                if let Err(e) = store.upsert_room(&code, created_at_ms) {
                    log::warn!("Failed to persist room {code}: {e}");
                }
            }
            StoreOp::AppendChat { code, entry } => {
                if let Err(e) = store.append_chat(&code, &entry) {
                    log::warn!("Failed to persist chat in room {code}: {e}");
                }
            }
            StoreOp::MarkInactive { code } => {
                if let Err(e) = store.mark_inactive(&code) {
                    log::warn!("Failed to deactivate room {code}: {e}");
                }
            }
        }
    }

    pub fn upsert_room(&self, code: &RoomCode, created_at_ms: u64) {
        self.send(StoreOp::UpsertRoom {
            code: code.clone(),
            created_at_ms,
        });
    }

    pub fn append_chat(&self, code: &RoomCode, entry: ChatEntry) {
        self.send(StoreOp::AppendChat {
            code: code.clone(),
            entry,
        });
    }

    pub fn mark_inactive(&self, code: &RoomCode) {
        self.send(StoreOp::MarkInactive { code: code.clone() });
    }

    fn send(&self, op: StoreOp) {
        // The writer only stops when all handles drop, so a send failure
        // here means shutdown is already underway.
        if self.tx.send(op).is_err() {
            log::debug!("Store writer gone, dropping write");
        }
    }
}
