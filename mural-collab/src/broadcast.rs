//! Per-room broadcast fan-out.
//!
//! Each room owns one tokio broadcast channel. Frames are encoded once and
//! shared as `Arc<Vec<u8>>`, so fan-out to N session tasks costs N pointer
//! clones rather than N serializations.
//!
//! Delivery scope is evaluated at the receiver: frames tagged
//! [`DeliveryScope::ExceptOrigin`] are dropped by the session whose
//! connection id matches the origin. Sending to everyone and filtering at
//! the edge keeps the send path a single channel operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerFrame};

/// Who a frame is for, relative to its origin connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryScope {
    /// Every member of the room, origin included (chat, roster updates).
    All,
    /// Every member except the origin (draw echoes, clear, join notices).
    ExceptOrigin,
}

/// An encoded server frame in flight to a room's members.
#[derive(Debug, Clone)]
pub struct RoomFrame {
    /// Connection that caused the frame.
    pub origin: Uuid,
    pub scope: DeliveryScope,
    /// Pre-encoded wire bytes, shared across all receivers.
    pub payload: Arc<Vec<u8>>,
}

impl RoomFrame {
    /// Whether the session owning `conn_id` should forward this frame.
    pub fn is_for(&self, conn_id: Uuid) -> bool {
        match self.scope {
            DeliveryScope::All => true,
            DeliveryScope::ExceptOrigin => self.origin != conn_id,
        }
    }
}

/// Broadcast statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub active_receivers: usize,
}

/// The fan-out channel for one room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<RoomFrame>,
    capacity: usize,
    frames_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a group with a bounded ring of `capacity` in-flight frames.
    /// A receiver that lags more than `capacity` frames behind observes
    /// `RecvError::Lagged` and loses the overwritten frames.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Subscribe a new session. The receiver observes every frame sent
    /// after this call, in send order.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomFrame> {
        self.sender.subscribe()
    }

    /// Encode `frame` once and fan it out. Returns the number of receivers
    /// the frame reached; zero when the room has no listeners, which is not
    /// an error.
    pub fn send(
        &self,
        origin: Uuid,
        scope: DeliveryScope,
        frame: &ServerFrame,
    ) -> Result<usize, ProtocolError> {
        let payload = Arc::new(frame.encode()?);
        let reached = self
            .sender
            .send(RoomFrame {
                origin,
                scope,
                payload,
            })
            .unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(reached)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            active_receivers: self.sender.receiver_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Point, Stroke};

    fn draw_frame() -> ServerFrame {
        ServerFrame::Draw {
            stroke: Stroke::new(
                Point::new(1.0, 2.0),
                Point::new(3.0, 4.0),
                [0.0, 0.0, 0.0, 1.0],
                1.0,
            ),
        }
    }

    #[tokio::test]
    async fn test_fanout_reaches_all_receivers() {
        let group = BroadcastGroup::new(16);
        let mut rx_a = group.subscribe();
        let mut rx_b = group.subscribe();

        let reached = group
            .send(Uuid::new_v4(), DeliveryScope::All, &draw_frame())
            .unwrap();
        assert_eq!(reached, 2);

        let frame_a = rx_a.recv().await.unwrap();
        let frame_b = rx_b.recv().await.unwrap();
        // Same payload allocation on both sides.
        assert!(Arc::ptr_eq(&frame_a.payload, &frame_b.payload));
    }

    #[tokio::test]
    async fn test_except_origin_filters_sender() {
        let group = BroadcastGroup::new(16);
        let sender_id = Uuid::new_v4();
        let peer_id = Uuid::new_v4();
        let mut rx = group.subscribe();

        group
            .send(sender_id, DeliveryScope::ExceptOrigin, &draw_frame())
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(!frame.is_for(sender_id));
        assert!(frame.is_for(peer_id));
    }

    #[tokio::test]
    async fn test_all_scope_includes_origin() {
        let group = BroadcastGroup::new(16);
        let sender_id = Uuid::new_v4();
        let mut rx = group.subscribe();

        group
            .send(
                sender_id,
                DeliveryScope::All,
                &ServerFrame::Chat(crate::protocol::ChatEntry {
                    user: "SwiftFox".to_string(),
                    text: "hi".to_string(),
                    timestamp_ms: 0,
                }),
            )
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert!(frame.is_for(sender_id));
    }

    #[tokio::test]
    async fn test_send_without_receivers_is_ok() {
        let group = BroadcastGroup::new(16);
        let reached = group
            .send(Uuid::new_v4(), DeliveryScope::All, &draw_frame())
            .unwrap();
        assert_eq!(reached, 0);
        assert_eq!(group.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_receivers_observe_send_order() {
        let group = BroadcastGroup::new(64);
        let mut rx = group.subscribe();
        let origin = Uuid::new_v4();

        for i in 0..10u64 {
            group
                .send(
                    origin,
                    DeliveryScope::All,
                    &ServerFrame::Chat(crate::protocol::ChatEntry {
                        user: "NeonOwl".to_string(),
                        text: i.to_string(),
                        timestamp_ms: i,
                    }),
                )
                .unwrap();
        }

        for i in 0..10u64 {
            let frame = rx.recv().await.unwrap();
            match ServerFrame::decode(&frame.payload).unwrap() {
                ServerFrame::Chat(entry) => assert_eq!(entry.timestamp_ms, i),
                other => panic!("Expected Chat, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_lagged_receiver_detects_loss() {
        let group = BroadcastGroup::new(4);
        let mut rx = group.subscribe();
        let origin = Uuid::new_v4();

        for _ in 0..10 {
            group.send(origin, DeliveryScope::All, &draw_frame()).unwrap();
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed > 0),
            other => panic!("Expected Lagged, got {other:?}"),
        }
    }
}
