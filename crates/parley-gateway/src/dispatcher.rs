use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::ServerEvent;

/// In-memory registry of live connections and their room subscriptions.
/// Never persisted; rebuilt from scratch as connections come and go.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct ConnectionHandle {
    user_id: i64,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

struct DispatcherInner {
    /// conn_id -> live handle
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,

    /// user_id -> their open connections (a user may have several tabs)
    user_connections: RwLock<HashMap<i64, HashSet<Uuid>>>,

    /// room id -> subscribed connections (the room channel)
    rooms: RwLock<HashMap<i64, HashSet<Uuid>>>,

    /// Per-room mutual exclusion for the check+append+broadcast sequence.
    /// The tokio runtime is multi-threaded, so without this two
    /// connections could interleave their ledger writes for one room.
    room_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                user_connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
                room_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection. Returns (conn_id, event receiver, and
    /// whether this is the user's first live connection).
    pub async fn register(
        &self,
        user_id: i64,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, ConnectionHandle { user_id, tx });

        let mut users = self.inner.user_connections.write().await;
        let conns = users.entry(user_id).or_default();
        let first = conns.is_empty();
        conns.insert(conn_id);

        (conn_id, rx, first)
    }

    /// Drop a connection and all its subscriptions. Returns (user_id,
    /// whether this was the user's last live connection).
    pub async fn unregister(&self, conn_id: Uuid) -> Option<(i64, bool)> {
        let handle = self.inner.connections.write().await.remove(&conn_id)?;

        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, subs| {
            subs.remove(&conn_id);
            !subs.is_empty()
        });
        drop(rooms);

        let mut users = self.inner.user_connections.write().await;
        let last = match users.get_mut(&handle.user_id) {
            Some(conns) => {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    users.remove(&handle.user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        Some((handle.user_id, last))
    }

    pub async fn subscribe(&self, conn_id: Uuid, room_id: i64) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(conn_id);
    }

    pub async fn subscribe_many(&self, conn_id: Uuid, room_ids: &[i64]) {
        let mut rooms = self.inner.rooms.write().await;
        for &room_id in room_ids {
            rooms.entry(room_id).or_default().insert(conn_id);
        }
    }

    pub async fn unsubscribe(&self, conn_id: Uuid, room_id: i64) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(subs) = rooms.get_mut(&room_id) {
            subs.remove(&conn_id);
            if subs.is_empty() {
                rooms.remove(&room_id);
            }
        }
    }

    pub async fn is_subscribed(&self, conn_id: Uuid, room_id: i64) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(&room_id)
            .is_some_and(|subs| subs.contains(&conn_id))
    }

    /// Deliver an event to every subscriber of the room channel,
    /// optionally skipping one connection.
    pub async fn broadcast_room(
        &self,
        room_id: i64,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) {
        let rooms = self.inner.rooms.read().await;
        let Some(subs) = rooms.get(&room_id) else {
            return;
        };
        let connections = self.inner.connections.read().await;
        for conn_id in subs {
            if Some(*conn_id) == exclude {
                continue;
            }
            if let Some(handle) = connections.get(conn_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to every live connection (presence updates).
    pub async fn broadcast_all(&self, event: &ServerEvent, exclude: Option<Uuid>) {
        let connections = self.inner.connections.read().await;
        for (conn_id, handle) in connections.iter() {
            if Some(*conn_id) == exclude {
                continue;
            }
            let _ = handle.tx.send(event.clone());
        }
    }

    /// Targeted send to a single connection.
    pub async fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(handle) = connections.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// The room's mutual-exclusion handle. Locks are created lazily and
    /// kept for the life of the process; room counts are small.
    pub async fn room_lock(&self, room_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.inner.room_locks.lock().await;
        locks.entry(room_id).or_default().clone()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_online(user_id: i64) -> ServerEvent {
        ServerEvent::UserOnline { user_id }
    }

    #[tokio::test]
    async fn room_broadcast_reaches_subscribers_only() {
        let d = Dispatcher::new();
        let (a, mut rx_a, _) = d.register(1).await;
        let (b, mut rx_b, _) = d.register(2).await;
        let (_c, mut rx_c, _) = d.register(3).await;

        d.subscribe(a, 7).await;
        d.subscribe(b, 7).await;

        d.broadcast_room(7, &ServerEvent::JoinedRoom { room_id: 7 }, None)
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn exclusion_skips_the_named_connection() {
        let d = Dispatcher::new();
        let (a, mut rx_a, _) = d.register(1).await;
        let (b, mut rx_b, _) = d.register(2).await;
        d.subscribe_many(a, &[7]).await;
        d.subscribe_many(b, &[7]).await;

        d.broadcast_room(
            7,
            &ServerEvent::MessageRead {
                message_id: 1,
                user_id: 1,
            },
            Some(a),
        )
        .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_and_unregister_stop_delivery() {
        let d = Dispatcher::new();
        let (a, mut rx_a, _) = d.register(1).await;
        d.subscribe(a, 7).await;
        assert!(d.is_subscribed(a, 7).await);

        d.unsubscribe(a, 7).await;
        assert!(!d.is_subscribed(a, 7).await);
        d.broadcast_room(7, &user_online(9), None).await;
        assert!(rx_a.try_recv().is_err());

        d.subscribe(a, 7).await;
        d.unregister(a).await;
        d.broadcast_room(7, &user_online(9), None).await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_transitions_only_on_first_and_last() {
        let d = Dispatcher::new();
        let (c1, _rx1, first) = d.register(5).await;
        assert!(first);
        let (c2, _rx2, first) = d.register(5).await;
        assert!(!first);

        let (_, last) = d.unregister(c1).await.unwrap();
        assert!(!last);
        let (user, last) = d.unregister(c2).await.unwrap();
        assert!(last);
        assert_eq!(user, 5);
    }

    #[tokio::test]
    async fn room_lock_is_shared_per_room() {
        let d = Dispatcher::new();
        let l1 = d.room_lock(7).await;
        let l2 = d.room_lock(7).await;
        assert!(Arc::ptr_eq(&l1, &l2));

        let other = d.room_lock(8).await;
        assert!(!Arc::ptr_eq(&l1, &other));
    }
}
