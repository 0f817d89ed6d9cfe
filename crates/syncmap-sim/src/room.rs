//! In-memory room transport
//!
//! Connects any number of engines through unbounded channels instead of a
//! real peer mesh. Join and leave notify every other member; sends are
//! either directed or broadcast. Every send is recorded in a log so tests
//! can assert on exact message flows.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use syncmap_engine::{PeerId, RoomEvent, RoomTransport, SyncMessage, TransportError};

/// One logged send
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub from: PeerId,
    pub to: Option<PeerId>,
    pub message: SyncMessage,
}

#[derive(Default)]
struct RoomInner {
    members: HashMap<PeerId, mpsc::UnboundedSender<RoomEvent>>,
    log: Vec<SentMessage>,
}

/// A multi-peer room shared by simulated nodes
#[derive(Default)]
pub struct Room {
    inner: Mutex<RoomInner>,
}

impl Room {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a member. Existing members learn about the newcomer and the
    /// newcomer learns about them, in that relative order per receiver.
    pub fn join(self: &Arc<Self>, peer_id: &str) -> (Arc<RoomMember>, mpsc::UnboundedReceiver<RoomEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        for (other, sender) in &inner.members {
            let _ = sender.send(RoomEvent::PeerJoined(peer_id.to_string()));
            let _ = tx.send(RoomEvent::PeerJoined(other.clone()));
        }
        inner.members.insert(peer_id.to_string(), tx);
        let member = Arc::new(RoomMember {
            room: self.clone(),
            id: peer_id.to_string(),
        });
        (member, rx)
    }

    /// Remove a member and notify the rest
    pub fn leave(&self, peer_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.members.remove(peer_id);
        for sender in inner.members.values() {
            let _ = sender.send(RoomEvent::PeerLeft(peer_id.to_string()));
        }
    }

    /// Snapshot of everything sent so far
    pub fn log(&self) -> Vec<SentMessage> {
        self.inner.lock().unwrap().log.clone()
    }

    /// How many messages of a kind were sent
    pub fn count_kind(&self, kind: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|entry| entry.message.kind() == kind)
            .count()
    }

    /// Forget the log (not the members)
    pub fn clear_log(&self) {
        self.inner.lock().unwrap().log.clear();
    }

    fn send_from(
        &self,
        from: &str,
        message: SyncMessage,
        to: Option<&PeerId>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.push(SentMessage {
            from: from.to_string(),
            to: to.cloned(),
            message: message.clone(),
        });
        match to {
            Some(target) => {
                let sender = inner
                    .members
                    .get(target)
                    .ok_or_else(|| TransportError::UnknownPeer(target.clone()))?;
                sender
                    .send(RoomEvent::Message {
                        from: from.to_string(),
                        message,
                    })
                    .map_err(|e| TransportError::SendFailed(e.to_string()))
            }
            None => {
                for (other, sender) in &inner.members {
                    if other != from {
                        let _ = sender.send(RoomEvent::Message {
                            from: from.to_string(),
                            message: message.clone(),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// The outbound handle a node's engine sends through
pub struct RoomMember {
    room: Arc<Room>,
    id: PeerId,
}

impl RoomMember {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl RoomTransport for RoomMember {
    async fn send(&self, message: SyncMessage, to: Option<&PeerId>) -> Result<(), TransportError> {
        self.room.send_from(&self.id, message, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_notifies_both_sides() {
        let room = Room::new();
        let (_a, mut rx_a) = room.join("a");
        let (_b, mut rx_b) = room.join("b");

        match rx_a.try_recv().unwrap() {
            RoomEvent::PeerJoined(id) => assert_eq!(id, "b"),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx_b.try_recv().unwrap() {
            RoomEvent::PeerJoined(id) => assert_eq!(id, "a"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_directed_send_reaches_target_only() {
        let room = Room::new();
        let (a, _rx_a) = room.join("a");
        let (_b, mut rx_b) = room.join("b");
        let (_c, mut rx_c) = room.join("c");
        // drain join notifications
        while rx_b.try_recv().is_ok() {}
        while rx_c.try_recv().is_ok() {}

        a.send(
            SyncMessage::RootHash {
                merkle_root: "ab".repeat(32),
            },
            Some(&"b".to_string()),
        )
        .await
        .unwrap();

        assert!(matches!(
            rx_b.try_recv().unwrap(),
            RoomEvent::Message { from, .. } if from == "a"
        ));
        assert!(rx_c.try_recv().is_err());
        assert_eq!(room.count_kind("rootHash"), 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let room = Room::new();
        let (a, mut rx_a) = room.join("a");
        let (_b, mut rx_b) = room.join("b");
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        a.send(
            SyncMessage::RootHash {
                merkle_root: "ab".repeat(32),
            },
            None,
        )
        .await
        .unwrap();

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_notifies_rest() {
        let room = Room::new();
        let (_a, mut rx_a) = room.join("a");
        let (_b, _rx_b) = room.join("b");
        while rx_a.try_recv().is_ok() {}

        room.leave("b");
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            RoomEvent::PeerLeft(id) if id == "b"
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let room = Room::new();
        let (a, _rx_a) = room.join("a");
        let err = a
            .send(
                SyncMessage::RootHash {
                    merkle_root: "ab".repeat(32),
                },
                Some(&"ghost".to_string()),
            )
            .await;
        assert!(matches!(err, Err(TransportError::UnknownPeer(_))));
    }
}
