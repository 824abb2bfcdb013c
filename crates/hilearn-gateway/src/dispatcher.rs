use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use hilearn_types::events::GatewayEvent;

type Outbound = mpsc::UnboundedSender<GatewayEvent>;

/// Connection registry. Each user id is a room holding every live
/// connection of that user (one per tab or device).
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (conn_id -> outbound queue)
    rooms: RwLock<HashMap<Uuid, HashMap<Uuid, Outbound>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the user's room. Returns (conn_id, receiver) for the new connection.
    pub async fn join(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut rooms = self.inner.rooms.write().await;
        let room = rooms.entry(user_id).or_default();
        room.insert(conn_id, tx);
        debug!("{} joined room {} ({} connections)", conn_id, user_id, room.len());

        (conn_id, rx)
    }

    /// Leave the user's room. The room itself is dropped once empty.
    pub async fn leave(&self, user_id: Uuid, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(room) = rooms.get_mut(&user_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(&user_id);
            }
        }
    }

    /// Deliver an event to every live connection of `user_id`.
    /// Returns how many connections accepted it.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(room) = rooms.get(&user_id) else {
            return 0;
        };

        room.values().filter(|tx| tx.send(event.clone()).is_ok()).count()
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}
