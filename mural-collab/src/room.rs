//! A single live room: roster, draw history, chat relay.
//!
//! Every mutation takes the room's mutex and broadcasts while still holding
//! it, so all members observe the same total order of events. Subscribing
//! happens inside [`Room::join`] under the same lock, which makes the replay
//! snapshot and the live stream a gapless, non-overlapping pair: every
//! stroke is either in the snapshot or arrives later on the receiver, never
//! both.

use tokio::sync::broadcast;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, BroadcastStats, DeliveryScope, RoomFrame};
use crate::identity::RoomCode;
use crate::protocol::{ChatEntry, ServerFrame, Stroke, UserEntry};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One connection's membership in a room.
#[derive(Debug, Clone)]
pub struct Participant {
    pub conn_id: Uuid,
    pub name: String,
    pub joined_at_ms: u64,
}

impl Participant {
    pub fn new(conn_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            conn_id,
            name: name.into(),
            joined_at_ms: now_ms(),
        }
    }
}

/// Everything a joiner needs to catch up and stay current.
pub struct JoinSnapshot {
    /// Live stream, subscribed before any post-join frame was sent.
    pub receiver: broadcast::Receiver<RoomFrame>,
    /// Full stroke history at the moment of the join.
    pub draw_history: Vec<Stroke>,
    /// Roster including the joiner, in join order.
    pub roster: Vec<UserEntry>,
}

/// Result of removing a participant.
pub struct LeaveOutcome {
    /// Roster after the removal.
    pub roster: Vec<UserEntry>,
    /// True when the leaver was the last member.
    pub now_empty: bool,
}

struct RoomState {
    roster: Vec<Participant>,
    strokes: Vec<Stroke>,
}

/// A live room. Cheap to share as `Arc<Room>`; all mutation is internal.
pub struct Room {
    code: RoomCode,
    created_at_ms: u64,
    state: Mutex<RoomState>,
    broadcast: BroadcastGroup,
}

impl Room {
    pub fn new(code: RoomCode, broadcast_capacity: usize) -> Self {
        Self {
            code,
            created_at_ms: now_ms(),
            state: Mutex::new(RoomState {
                roster: Vec::new(),
                strokes: Vec::new(),
            }),
            broadcast: BroadcastGroup::new(broadcast_capacity),
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    fn entries(roster: &[Participant]) -> Vec<UserEntry> {
        roster
            .iter()
            .map(|p| UserEntry {
                conn_id: p.conn_id,
                name: p.name.clone(),
            })
            .collect()
    }

    /// Add a participant and atomically capture their catch-up snapshot.
    ///
    /// Peers are notified with `UserJoined` (the joiner already knows) and
    /// everyone, joiner included, gets the refreshed `UserList`.
    pub async fn join(&self, participant: Participant) -> JoinSnapshot {
        let mut state = self.state.lock().await;
        let conn_id = participant.conn_id;
        let name = participant.name.clone();
        state.roster.push(participant);

        // Subscribe under the lock: frames sent after this point land on
        // the receiver, everything before is in the snapshot.
        let receiver = self.broadcast.subscribe();
        let draw_history = state.strokes.clone();
        let roster = Self::entries(&state.roster);

        // Roster first, then the join notice, mirroring the leave path.
        let _ = self.broadcast.send(
            conn_id,
            DeliveryScope::All,
            &ServerFrame::UserList {
                users: roster.clone(),
            },
        );
        let _ = self.broadcast.send(
            conn_id,
            DeliveryScope::ExceptOrigin,
            &ServerFrame::UserJoined { name },
        );

        JoinSnapshot {
            receiver,
            draw_history,
            roster,
        }
    }

    /// Remove a participant. Unknown ids are a no-op apart from the
    /// returned roster, so duplicate disconnect paths stay harmless.
    pub async fn leave(&self, conn_id: Uuid) -> LeaveOutcome {
        let mut state = self.state.lock().await;
        let position = state.roster.iter().position(|p| p.conn_id == conn_id);
        let Some(position) = position else {
            return LeaveOutcome {
                now_empty: state.roster.is_empty(),
                roster: Self::entries(&state.roster),
            };
        };
        let leaver = state.roster.remove(position);
        let roster = Self::entries(&state.roster);

        let _ = self.broadcast.send(
            conn_id,
            DeliveryScope::All,
            &ServerFrame::UserList {
                users: roster.clone(),
            },
        );
        let _ = self.broadcast.send(
            conn_id,
            DeliveryScope::All,
            &ServerFrame::UserLeft { name: leaver.name },
        );

        LeaveOutcome {
            now_empty: roster.is_empty(),
            roster,
        }
    }

    /// Append a stroke and replicate it to everyone but the origin.
    pub async fn append_stroke(&self, origin: Uuid, stroke: Stroke) {
        let mut state = self.state.lock().await;
        state.strokes.push(stroke.clone());
        let _ = self.broadcast.send(
            origin,
            DeliveryScope::ExceptOrigin,
            &ServerFrame::Draw { stroke },
        );
    }

    /// Reset the draw history. Idempotent; clearing an empty canvas still
    /// notifies peers, matching what the origin's own canvas shows.
    pub async fn clear_canvas(&self, origin: Uuid) {
        let mut state = self.state.lock().await;
        state.strokes.clear();
        let _ = self
            .broadcast
            .send(origin, DeliveryScope::ExceptOrigin, &ServerFrame::ClearCanvas);
    }

    /// Stamp a chat message with the server clock and deliver it to every
    /// member, author included. Returns the stamped entry for persistence.
    pub async fn relay_chat(&self, origin: Uuid, author: &str, text: String) -> ChatEntry {
        // Lock held across stamp+send: timestamps are monotone within the
        // room and match broadcast order.
        let _state = self.state.lock().await;
        let entry = ChatEntry {
            user: author.to_string(),
            text,
            timestamp_ms: now_ms(),
        };
        let _ = self
            .broadcast
            .send(origin, DeliveryScope::All, &ServerFrame::Chat(entry.clone()));
        entry
    }

    /// Current stroke history, oldest first.
    pub async fn replay(&self) -> Vec<Stroke> {
        self.state.lock().await.strokes.clone()
    }

    /// Current roster in join order.
    pub async fn roster(&self) -> Vec<UserEntry> {
        let state = self.state.lock().await;
        Self::entries(&state.roster)
    }

    pub async fn participant_count(&self) -> usize {
        self.state.lock().await.roster.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.roster.is_empty()
    }

    /// Observe the room's stream without joining. Test and tooling hook.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomFrame> {
        self.broadcast.subscribe()
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.broadcast.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Point;

    fn test_room() -> Room {
        Room::new(RoomCode::parse("ROOM01").unwrap(), 64)
    }

    fn stroke(n: f32) -> Stroke {
        Stroke::new(Point::new(n, n), Point::new(n + 1.0, n + 1.0), [0.0; 4], 1.0)
    }

    async fn next_frame(rx: &mut broadcast::Receiver<RoomFrame>) -> ServerFrame {
        let frame = rx.recv().await.unwrap();
        ServerFrame::decode(&frame.payload).unwrap()
    }

    #[tokio::test]
    async fn test_join_snapshot_has_history_and_roster() {
        let room = test_room();
        let first = Uuid::new_v4();
        room.join(Participant::new(first, "SwiftFox")).await;
        room.append_stroke(first, stroke(1.0)).await;
        room.append_stroke(first, stroke(2.0)).await;

        let second = Uuid::new_v4();
        let snapshot = room.join(Participant::new(second, "NeonOwl")).await;

        assert_eq!(snapshot.draw_history.len(), 2);
        assert_eq!(snapshot.roster.len(), 2);
        assert_eq!(snapshot.roster[0].name, "SwiftFox");
        assert_eq!(snapshot.roster[1].name, "NeonOwl");
    }

    #[tokio::test]
    async fn test_no_stroke_lost_or_duplicated_across_join() {
        let room = test_room();
        let first = Uuid::new_v4();
        room.join(Participant::new(first, "SwiftFox")).await;
        room.append_stroke(first, stroke(0.0)).await;

        let second = Uuid::new_v4();
        let mut snapshot = room.join(Participant::new(second, "NeonOwl")).await;
        room.append_stroke(first, stroke(1.0)).await;

        assert_eq!(snapshot.draw_history.len(), 1);
        assert_eq!(snapshot.draw_history[0].from.x, 0.0);

        // Skip the join-time roster traffic; the live stroke arrives next.
        loop {
            match next_frame(&mut snapshot.receiver).await {
                ServerFrame::Draw { stroke: s } => {
                    assert_eq!(s.from.x, 1.0);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_draw_excludes_origin() {
        let room = test_room();
        let artist = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        room.join(Participant::new(artist, "SwiftFox")).await;
        let mut snapshot = room.join(Participant::new(viewer, "NeonOwl")).await;

        room.append_stroke(artist, stroke(5.0)).await;

        loop {
            let frame = snapshot.receiver.recv().await.unwrap();
            if let ServerFrame::Draw { .. } = ServerFrame::decode(&frame.payload).unwrap() {
                assert!(frame.is_for(viewer));
                assert!(!frame.is_for(artist));
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_clear_canvas_resets_history() {
        let room = test_room();
        let artist = Uuid::new_v4();
        room.join(Participant::new(artist, "SwiftFox")).await;
        room.append_stroke(artist, stroke(1.0)).await;
        room.clear_canvas(artist).await;

        assert!(room.replay().await.is_empty());

        // Idempotent on an already-empty canvas.
        room.clear_canvas(artist).await;
        assert!(room.replay().await.is_empty());
    }

    #[tokio::test]
    async fn test_chat_reaches_author() {
        let room = test_room();
        let author = Uuid::new_v4();
        let mut snapshot = room.join(Participant::new(author, "SwiftFox")).await;

        let entry = room.relay_chat(author, "SwiftFox", "hello".to_string()).await;
        assert_eq!(entry.user, "SwiftFox");

        loop {
            let frame = snapshot.receiver.recv().await.unwrap();
            if let ServerFrame::Chat(received) = ServerFrame::decode(&frame.payload).unwrap() {
                assert!(frame.is_for(author));
                assert_eq!(received, entry);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_chat_timestamps_monotone() {
        let room = test_room();
        let author = Uuid::new_v4();
        room.join(Participant::new(author, "SwiftFox")).await;

        let mut last = 0u64;
        for i in 0..20 {
            let entry = room.relay_chat(author, "SwiftFox", i.to_string()).await;
            assert!(entry.timestamp_ms >= last);
            last = entry.timestamp_ms;
        }
    }

    #[tokio::test]
    async fn test_join_notifies_roster_before_join_notice() {
        let room = test_room();
        let mut snapshot = room.join(Participant::new(Uuid::new_v4(), "SwiftFox")).await;
        room.join(Participant::new(Uuid::new_v4(), "NeonOwl")).await;

        // Own-join roster first, then the peer's join: list before notice.
        let mut saw_peer_list = false;
        loop {
            match next_frame(&mut snapshot.receiver).await {
                ServerFrame::UserList { users } if users.len() == 2 => {
                    saw_peer_list = true;
                }
                ServerFrame::UserJoined { name } => {
                    assert_eq!(name, "NeonOwl");
                    assert!(saw_peer_list, "UserList should precede UserJoined");
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_leave_updates_roster_and_flags_empty() {
        let room = test_room();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        room.join(Participant::new(a, "SwiftFox")).await;
        room.join(Participant::new(b, "NeonOwl")).await;

        let outcome = room.leave(a).await;
        assert_eq!(outcome.roster.len(), 1);
        assert_eq!(outcome.roster[0].name, "NeonOwl");
        assert!(!outcome.now_empty);

        let outcome = room.leave(b).await;
        assert!(outcome.now_empty);
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn test_leave_unknown_participant_is_noop() {
        let room = test_room();
        let member = Uuid::new_v4();
        room.join(Participant::new(member, "SwiftFox")).await;

        let outcome = room.leave(Uuid::new_v4()).await;
        assert_eq!(outcome.roster.len(), 1);
        assert!(!outcome.now_empty);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_members() {
        let room = test_room();
        let stayer = Uuid::new_v4();
        let leaver = Uuid::new_v4();
        let mut snapshot = room.join(Participant::new(stayer, "SwiftFox")).await;
        room.join(Participant::new(leaver, "NeonOwl")).await;
        room.leave(leaver).await;

        let mut saw_list = false;
        loop {
            match next_frame(&mut snapshot.receiver).await {
                ServerFrame::UserList { users } if users.len() == 1 => {
                    assert_eq!(users[0].name, "SwiftFox");
                    saw_list = true;
                }
                ServerFrame::UserLeft { name } => {
                    assert_eq!(name, "NeonOwl");
                    assert!(saw_list, "UserList should precede UserLeft");
                    break;
                }
                _ => continue,
            }
        }
    }
}
