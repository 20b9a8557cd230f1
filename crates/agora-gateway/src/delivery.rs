use tracing::{error, trace};

use agora_types::UserId;
use agora_types::frames::ServerFrame;

use crate::registry::ConnectionRegistry;

/// Result of a push attempt. Being offline is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Offline,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

/// Push-now-or-drop delivery to live connections.
///
/// No retries, no mailbox, no acknowledgements. Pushing never awaits: the
/// frame is queued on the target connection and written by its send task.
#[derive(Clone)]
pub struct DeliveryEngine {
    registry: ConnectionRegistry,
}

impl DeliveryEngine {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn deliver(&self, user_id: &UserId, frame: &ServerFrame) -> Delivery {
        match serialize(frame) {
            Some(text) => self.push(user_id, text, frame.kind()),
            None => Delivery::Offline,
        }
    }

    /// Deliver one frame to several users, serializing it once.
    /// Returns how many were actually reached.
    pub fn deliver_many<'a, I>(&self, user_ids: I, frame: &ServerFrame) -> usize
    where
        I: IntoIterator<Item = &'a UserId>,
    {
        let Some(text) = serialize(frame) else {
            return 0;
        };

        user_ids
            .into_iter()
            .filter(|user_id| self.push(user_id, text.clone(), frame.kind()).is_delivered())
            .count()
    }

    fn push(&self, user_id: &UserId, text: String, kind: &str) -> Delivery {
        let Some(conn) = self.registry.lookup(user_id) else {
            trace!("{} offline, dropping {} frame", user_id, kind);
            return Delivery::Offline;
        };

        if conn.push_text(text) {
            trace!("queued {} frame for {} on {}", kind, user_id, conn.id());
            Delivery::Delivered
        } else {
            trace!("{} connection {} is closing, dropping {} frame", user_id, conn.id(), kind);
            Delivery::Offline
        }
    }
}

fn serialize(frame: &ServerFrame) -> Option<String> {
    serde_json::to_string(frame)
        .map_err(|e| error!("failed to serialize {} frame: {}", frame.kind(), e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, Outbound};
    use agora_types::frames::ModerationAction;

    fn notice() -> ServerFrame {
        ServerFrame::ModerationNotification {
            content_type: "comment".into(),
            content_id: "c1".into(),
            action: ModerationAction::Approve,
        }
    }

    #[test]
    fn offline_user_is_a_silent_no_op() {
        let engine = DeliveryEngine::new(ConnectionRegistry::new());
        assert_eq!(engine.deliver(&UserId::from("nobody"), &notice()), Delivery::Offline);
    }

    #[test]
    fn live_user_receives_serialized_frame() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = ConnectionHandle::new(UserId::from("a"));
        registry.register(conn);
        let engine = DeliveryEngine::new(registry);

        assert_eq!(engine.deliver(&UserId::from("a"), &notice()), Delivery::Delivered);

        let Outbound::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected a text frame");
        };
        let frame: ServerFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame, notice());
    }

    #[test]
    fn closed_connection_counts_as_offline() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = ConnectionHandle::new(UserId::from("a"));
        registry.register(conn.clone());
        conn.close();

        let engine = DeliveryEngine::new(registry);
        assert_eq!(engine.deliver(&UserId::from("a"), &notice()), Delivery::Offline);
    }

    #[test]
    fn deliver_many_counts_reached_users() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::new(UserId::from("a"));
        let (b, mut rx_b) = ConnectionHandle::new(UserId::from("b"));
        registry.register(a);
        registry.register(b);
        let engine = DeliveryEngine::new(registry);

        let targets = [UserId::from("a"), UserId::from("b"), UserId::from("c")];
        assert_eq!(engine.deliver_many(&targets, &notice()), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
