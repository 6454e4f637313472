use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Per-connection outbound queue depth.
pub const CONNECTION_QUEUE_CAPACITY: usize = 256;

/// An encoded text frame, shared between every recipient.
pub type Frame = Arc<str>;

pub type ConnectionId = Uuid;

/// Every live connection of one user.
pub struct RelayRoom {
    name: String,
    senders: HashMap<ConnectionId, mpsc::Sender<Frame>>,
}

impl RelayRoom {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            senders: HashMap::new(),
        }
    }

    pub fn join(&mut self, conn: ConnectionId, tx: mpsc::Sender<Frame>) {
        self.senders.insert(conn, tx);

        info!(
            room = %self.name,
            conn = %conn,
            connections = self.senders.len(),
            "Connection joined relay room"
        );
    }

    pub fn leave(&mut self, conn: &ConnectionId) {
        self.senders.remove(conn);

        info!(
            room = %self.name,
            conn = %conn,
            connections = self.senders.len(),
            "Connection left relay room"
        );
    }

    /// Queue a frame for every connection in the room, the sender's own
    /// included. Returns how many queues accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let mut delivered = 0;
        for (conn, tx) in &self.senders {
            if tx.try_send(Arc::clone(frame)).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    room = %self.name,
                    target = %conn,
                    "Dropping frame for slow or closed connection"
                );
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// All relay rooms, keyed by room name (`user:<id>`).
#[derive(Clone, Default)]
pub struct RelayHub {
    rooms: Arc<RwLock<HashMap<String, RelayRoom>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a room, creating it if missing.
    pub async fn join_room(&self, room: &str, conn: ConnectionId, tx: mpsc::Sender<Frame>) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| RelayRoom::new(room))
            .join(conn, tx);
    }

    /// Leave a room. Auto-deletes the room if it becomes empty.
    pub async fn leave_room(&self, room: &str, conn: &ConnectionId) {
        let mut rooms = self.rooms.write().await;
        let should_remove = if let Some(r) = rooms.get_mut(room) {
            r.leave(conn);
            r.is_empty()
        } else {
            false
        };

        if should_remove {
            rooms.remove(room);
            debug!(room = %room, "Removed empty relay room");
        }
    }

    pub async fn broadcast(&self, room: &str, frame: Frame) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room) {
            Some(r) => r.broadcast(&frame),
            None => {
                debug!(room = %room, "Broadcast to room with no connections");
                0
            }
        }
    }

    #[cfg(test)]
    pub async fn list_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    pub async fn connection_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.connection_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_join_leave() {
        let hub = RelayHub::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);

        hub.join_room("user:a", conn, tx).await;
        assert_eq!(hub.connection_count("user:a").await, 1);

        hub.leave_room("user:a", &conn).await;
        assert!(hub.list_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_whole_room_including_sender() {
        let hub = RelayHub::new();
        let (web_tx, mut web_rx) = mpsc::channel(4);
        let (mobile_tx, mut mobile_rx) = mpsc::channel(4);
        let (other_tx, mut other_rx) = mpsc::channel(4);

        hub.join_room("user:a", Uuid::new_v4(), web_tx).await;
        hub.join_room("user:a", Uuid::new_v4(), mobile_tx).await;
        hub.join_room("user:b", Uuid::new_v4(), other_tx).await;

        let frame: Frame = Arc::from(r#"{"event":"message","data":{}}"#);
        assert_eq!(hub.broadcast("user:a", frame.clone()).await, 2);

        assert_eq!(web_rx.recv().await.unwrap(), frame);
        assert_eq!(mobile_rx.recv().await.unwrap(), frame);
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let hub = RelayHub::new();
        let (tx, mut rx) = mpsc::channel(1);
        hub.join_room("user:a", Uuid::new_v4(), tx).await;

        let frame: Frame = Arc::from("x");
        assert_eq!(hub.broadcast("user:a", frame.clone()).await, 1);
        assert_eq!(hub.broadcast("user:a", frame.clone()).await, 0);
        assert_eq!(rx.recv().await.unwrap(), frame);
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_room() {
        let hub = RelayHub::new();
        assert_eq!(hub.broadcast("user:nobody", Arc::from("x")).await, 0);
    }
}
