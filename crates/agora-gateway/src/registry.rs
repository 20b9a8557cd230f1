use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use agora_types::UserId;
use agora_types::frames::ServerFrame;

/// Work item for a connection's send task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized frame, written to the socket verbatim.
    Text(String),
    /// A newer connection for the same user took over; close this one.
    Evict,
}

/// The registry's view of one live socket.
///
/// Cloning is cheap; all clones share the outbound queue and liveness flag.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: UserId,
    tx: mpsc::UnboundedSender<Outbound>,
    live: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving end the socket's send task drains.
    pub fn new(user_id: UserId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
            live: Arc::new(AtomicBool::new(true)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue an already serialized frame. Returns false if the connection is gone.
    pub fn push_text(&self, text: String) -> bool {
        if !self.is_live() {
            return false;
        }
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    pub fn push_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.push_text(text),
            Err(e) => {
                error!("failed to serialize {} frame: {}", frame.kind(), e);
                false
            }
        }
    }

    /// Mark the connection dead. Pushes after this are refused.
    pub fn close(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Server-initiated close: refuse further pushes and tell the send task to hang up.
    pub fn evict(&self) {
        self.close();
        let _ = self.tx.send(Outbound::Evict);
    }
}

/// Maps each user to their single live connection.
///
/// Last registration wins: registering a second connection for a user
/// evicts the first. Each relay owns its own registry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the user's connection. Returns the connection it
    /// replaced, which has already been evicted.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id().clone();
        let conn_id = handle.id();

        let previous = self.connections.insert(user_id.clone(), handle);
        if let Some(old) = &previous {
            if old.id() != conn_id {
                info!("{} reconnected, evicting connection {}", user_id, old.id());
                old.evict();
            }
        }

        debug!("registered {} on connection {} ({} online)", user_id, conn_id, self.len());
        previous
    }

    /// Remove the user's entry whatever connection it points at. Idempotent.
    pub fn unregister(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.connections.remove(user_id).map(|(_, handle)| handle)
    }

    /// Remove the user's entry only if it still belongs to `conn_id`, so a
    /// superseded connection shutting down leaves its replacement alone.
    pub fn unregister_connection(&self, user_id: &UserId, conn_id: Uuid) -> bool {
        self.connections
            .remove_if(user_id, |_, handle| handle.id() == conn_id)
            .is_some()
    }

    pub fn lookup(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.connections.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.lookup(user_id).is_some_and(|handle| handle.is_live())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let user = UserId::from("u");

        let (c1, mut rx1) = ConnectionHandle::new(user.clone());
        let (c2, _rx2) = ConnectionHandle::new(user.clone());

        assert!(registry.register(c1.clone()).is_none());
        let replaced = registry.register(c2.clone()).unwrap();

        assert_eq!(replaced.id(), c1.id());
        assert_eq!(registry.lookup(&user).unwrap().id(), c2.id());
        assert_eq!(registry.len(), 1);

        // The superseded connection is told to close and refuses pushes.
        assert_eq!(rx1.try_recv().unwrap(), Outbound::Evict);
        assert!(!c1.is_live());
        assert!(!c1.push_text("late".into()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = UserId::from("u");
        let (conn, _rx) = ConnectionHandle::new(user.clone());
        registry.register(conn);

        assert!(registry.unregister(&user).is_some());
        assert!(registry.unregister(&user).is_none());
        assert!(registry.lookup(&user).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_connection_cannot_unregister_its_replacement() {
        let registry = ConnectionRegistry::new();
        let user = UserId::from("u");
        let (c1, _rx1) = ConnectionHandle::new(user.clone());
        let (c2, _rx2) = ConnectionHandle::new(user.clone());

        registry.register(c1.clone());
        registry.register(c2.clone());

        assert!(!registry.unregister_connection(&user, c1.id()));
        assert_eq!(registry.lookup(&user).unwrap().id(), c2.id());

        assert!(registry.unregister_connection(&user, c2.id()));
        assert!(registry.lookup(&user).is_none());
    }

    #[test]
    fn dropped_receiver_means_offline() {
        let registry = ConnectionRegistry::new();
        let user = UserId::from("u");
        let (conn, rx) = ConnectionHandle::new(user.clone());
        registry.register(conn);

        assert!(registry.is_online(&user));
        drop(rx);
        assert!(!registry.is_online(&user));
    }

    #[test]
    fn registries_are_isolated() {
        let a = ConnectionRegistry::new();
        let b = ConnectionRegistry::new();
        let (conn, _rx) = ConnectionHandle::new(UserId::from("u"));
        a.register(conn);

        assert!(b.lookup(&UserId::from("u")).is_none());
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }
}
