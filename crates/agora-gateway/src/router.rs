use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};

use agora_types::frames::{ClientFrame, ModerationAction, ServerFrame};
use agora_types::{ThreadId, UserId};

use crate::delivery::{Delivery, DeliveryEngine};
use crate::handshake::Identity;
use crate::protocol::ProtocolError;
use crate::store::{DeleteOutcome, MessageStore, ReactionOutcome};

/// Dispatches decoded frames from an authenticated connection.
///
/// Each call handles exactly one frame and returns how many frames were
/// pushed to other users as a result. Callers await each frame before
/// reading the next, which keeps per-connection ordering.
#[derive(Clone)]
pub struct EventRouter {
    store: Arc<dyn MessageStore>,
    delivery: DeliveryEngine,
}

impl EventRouter {
    pub fn new(store: Arc<dyn MessageStore>, delivery: DeliveryEngine) -> Self {
        Self { store, delivery }
    }

    pub async fn route(&self, identity: &Identity, frame: ClientFrame) -> Result<usize, ProtocolError> {
        let user_id = &identity.user_id;

        match frame {
            ClientFrame::Auth { .. } => Err(ProtocolError::AlreadyAuthenticated),

            ClientFrame::Message {
                thread_id,
                content,
                sender_id,
                recipient_id,
            } => {
                if sender_id.as_ref().is_some_and(|claimed| claimed != user_id) {
                    return Err(ProtocolError::SenderMismatch);
                }

                let recipients = self
                    .message_recipients(&thread_id, user_id, recipient_id)
                    .await?;

                let sent_at = Utc::now();
                let message_id = {
                    let (thread_id, sender, content) = (thread_id.clone(), user_id.clone(), content.clone());
                    self.with_store(move |store| store.append_message(&thread_id, &sender, &content, sent_at))
                        .await?
                };

                debug!("{} -> thread {} message {} ({} recipients)", user_id, thread_id, message_id, recipients.len());

                let frame = ServerFrame::Message {
                    thread_id,
                    content,
                    sender_id: user_id.clone(),
                    message_id,
                    sent_at,
                };
                Ok(self.delivery.deliver_many(&recipients, &frame))
            }

            ClientFrame::ReadReceipt { thread_id, message_id } => {
                self.participants_except(&thread_id, user_id).await?;

                let read_at = Utc::now();
                let original_sender = {
                    let (thread_id, message_id, reader) = (thread_id.clone(), message_id.clone(), user_id.clone());
                    self.with_store(move |store| store.mark_read(&thread_id, &message_id, &reader, read_at))
                        .await?
                }
                .ok_or_else(|| ProtocolError::NotFound(message_id.clone()))?;

                if &original_sender == user_id {
                    return Ok(0);
                }

                let frame = ServerFrame::ReadReceipt {
                    thread_id,
                    message_id,
                    reader_id: user_id.clone(),
                    read_at,
                };
                Ok(count(self.delivery.deliver(&original_sender, &frame)))
            }

            ClientFrame::MessageReaction {
                thread_id,
                message_id,
                emoji,
                action,
            } => {
                let others = self.participants_except(&thread_id, user_id).await?;

                let outcome = {
                    let (thread_id, message_id, actor, emoji) =
                        (thread_id.clone(), message_id.clone(), user_id.clone(), emoji.clone());
                    self.with_store(move |store| store.set_reaction(&thread_id, &message_id, &actor, &emoji, action))
                        .await?
                };

                match outcome {
                    ReactionOutcome::MessageNotFound => Err(ProtocolError::NotFound(message_id)),
                    ReactionOutcome::Unchanged => Ok(0),
                    ReactionOutcome::Changed => {
                        let frame = ServerFrame::MessageReaction {
                            thread_id,
                            message_id,
                            user_id: user_id.clone(),
                            emoji,
                            action,
                        };
                        Ok(self.delivery.deliver_many(&others, &frame))
                    }
                }
            }

            ClientFrame::DeleteMessage {
                thread_id,
                message_id,
                mode,
            } => {
                let others = self.participants_except(&thread_id, user_id).await?;

                let outcome = {
                    let (thread_id, message_id, requester) = (thread_id.clone(), message_id.clone(), user_id.clone());
                    self.with_store(move |store| {
                        store.delete_message(&thread_id, &message_id, &requester, mode, Utc::now())
                    })
                    .await?
                };

                match outcome {
                    DeleteOutcome::NotFound => Err(ProtocolError::NotFound(message_id)),
                    DeleteOutcome::NotAuthor => Err(ProtocolError::Forbidden(
                        "only the sender may delete a message".into(),
                    )),
                    DeleteOutcome::Deleted => {
                        info!("{} deleted message {} in thread {} ({:?})", user_id, message_id, thread_id, mode);
                        let frame = ServerFrame::DeleteMessage {
                            thread_id,
                            message_id,
                            deleted_by: user_id.clone(),
                            mode,
                        };
                        Ok(self.delivery.deliver_many(&others, &frame))
                    }
                }
            }

            // Typing is presence only: read the participant list, never write.
            ClientFrame::TypingStart { thread_id } => {
                let others = self.participants_except(&thread_id, user_id).await?;
                let frame = ServerFrame::TypingStart {
                    thread_id,
                    user_id: user_id.clone(),
                };
                Ok(self.delivery.deliver_many(&others, &frame))
            }

            ClientFrame::TypingStop { thread_id } => {
                let others = self.participants_except(&thread_id, user_id).await?;
                let frame = ServerFrame::TypingStop {
                    thread_id,
                    user_id: user_id.clone(),
                };
                Ok(self.delivery.deliver_many(&others, &frame))
            }

            ClientFrame::ModerationNotification {
                user_id: target,
                content_type,
                content_id,
                action,
            } => {
                if !identity.is_moderator() {
                    return Err(ProtocolError::Forbidden(
                        "moderation notifications require the moderator role".into(),
                    ));
                }

                let delivery = self.notify_moderation(&target, content_type, content_id, action);
                Ok(count(delivery))
            }
        }
    }

    /// Push a moderation outcome to the content owner if they are online.
    pub fn notify_moderation(
        &self,
        target: &UserId,
        content_type: String,
        content_id: String,
        action: ModerationAction,
    ) -> Delivery {
        let delivery = self.delivery.deliver(
            target,
            &ServerFrame::ModerationNotification {
                content_type: content_type.clone(),
                content_id: content_id.clone(),
                action,
            },
        );

        info!(
            "moderation {} of {} {} for {}: {:?}",
            action.as_str(),
            content_type,
            content_id,
            target,
            delivery
        );
        delivery
    }

    /// Everyone who should see `sender`'s message. A `recipient` lets the
    /// first message open a two-party thread the store has not seen yet.
    async fn message_recipients(
        &self,
        thread_id: &ThreadId,
        sender: &UserId,
        recipient: Option<UserId>,
    ) -> Result<Vec<UserId>, ProtocolError> {
        let mut participants = self.load_participants(thread_id).await?;

        if participants.is_empty() {
            let Some(recipient) = recipient.clone() else {
                return Err(ProtocolError::UnknownThread(thread_id.clone()));
            };
            if &recipient == sender {
                return Err(ProtocolError::InvalidPayload {
                    kind: "message".into(),
                    reason: "recipientId must differ from the sender".into(),
                });
            }

            let members = vec![sender.clone(), recipient.clone()];
            let thread = thread_id.clone();
            if self.with_store(move |store| store.open_thread(&thread, &members)).await? {
                info!("opened thread {} between {} and {}", thread_id, sender, recipient);
                return Ok(vec![recipient]);
            }

            // Someone else opened it first; their participant set stands.
            debug!("thread {} opened concurrently, rechecking membership", thread_id);
            participants = self.load_participants(thread_id).await?;
        }

        if !participants.contains(sender) {
            return Err(ProtocolError::NotAParticipant(thread_id.clone()));
        }
        if let Some(recipient) = &recipient {
            if !participants.contains(recipient) {
                return Err(ProtocolError::Forbidden(format!(
                    "{} is not in thread {}",
                    recipient, thread_id
                )));
            }
        }

        Ok(participants.into_iter().filter(|p| p != sender).collect())
    }

    /// Participants other than `user_id`, who must be one of them.
    async fn participants_except(
        &self,
        thread_id: &ThreadId,
        user_id: &UserId,
    ) -> Result<Vec<UserId>, ProtocolError> {
        let participants = self.load_participants(thread_id).await?;

        if participants.is_empty() {
            return Err(ProtocolError::UnknownThread(thread_id.clone()));
        }
        if !participants.contains(user_id) {
            return Err(ProtocolError::NotAParticipant(thread_id.clone()));
        }

        Ok(participants.into_iter().filter(|p| p != user_id).collect())
    }

    async fn load_participants(&self, thread_id: &ThreadId) -> Result<Vec<UserId>, ProtocolError> {
        let thread = thread_id.clone();
        self.with_store(move |store| store.participants(&thread)).await
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, ProtocolError>
    where
        F: FnOnce(&dyn MessageStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || f(store.as_ref())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!("store call failed: {:#}", e);
                Err(ProtocolError::PersistenceFailed)
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                Err(ProtocolError::PersistenceFailed)
            }
        }
    }
}

fn count(delivery: Delivery) -> usize {
    usize::from(delivery.is_delivered())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
    use crate::store::MemoryStore;
    use agora_types::MessageId;
    use agora_types::frames::{DeleteMode, ReactionAction};
    use agora_types::models::StoredMessage;
    use chrono::DateTime;
    use std::sync::Barrier;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        registry: ConnectionRegistry,
        store: Arc<MemoryStore>,
        router: EventRouter,
    }

    impl Harness {
        fn new() -> Self {
            let registry = ConnectionRegistry::new();
            let store = Arc::new(MemoryStore::new());
            let router = EventRouter::new(store.clone(), DeliveryEngine::new(registry.clone()));
            Self { registry, store, router }
        }

        fn connect(&self, user: &str) -> UnboundedReceiver<Outbound> {
            let (handle, rx) = ConnectionHandle::new(UserId::from(user));
            self.registry.register(handle);
            rx
        }

        fn thread(&self, id: &str, members: &[&str]) -> ThreadId {
            let thread = ThreadId::from(id);
            let members: Vec<UserId> = members.iter().map(|m| UserId::from(*m)).collect();
            self.store.open_thread(&thread, &members).unwrap();
            thread
        }
    }

    fn user(id: &str) -> Identity {
        Identity {
            user_id: UserId::from(id),
            roles: vec![],
        }
    }

    fn moderator(id: &str) -> Identity {
        Identity {
            user_id: UserId::from(id),
            roles: vec!["moderator".into()],
        }
    }

    fn frames(rx: &mut UnboundedReceiver<Outbound>) -> Vec<ServerFrame> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Text(text) = item {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    fn message(thread: &str, content: &str) -> ClientFrame {
        ClientFrame::Message {
            thread_id: ThreadId::from(thread),
            content: content.into(),
            sender_id: None,
            recipient_id: None,
        }
    }

    async fn send(h: &Harness, from: &str, thread: &ThreadId, content: &str) -> MessageId {
        h.router
            .route(&user(from), message(thread.as_str(), content))
            .await
            .unwrap();
        h.store
            .history(thread, 1)
            .unwrap()
            .pop()
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn message_reaches_recipient_exactly_once() {
        let h = Harness::new();
        let mut rx_a = h.connect("A");
        let mut rx_b = h.connect("B");
        h.thread("T1", &["A", "B"]);

        let delivered = h
            .router
            .route(
                &user("A"),
                ClientFrame::Message {
                    thread_id: ThreadId::from("T1"),
                    content: "C".into(),
                    sender_id: Some(UserId::from("A")),
                    recipient_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let received = frames(&mut rx_b);
        assert_eq!(received.len(), 1);
        let ServerFrame::Message { thread_id, content, sender_id, .. } = &received[0] else {
            panic!("expected a message frame, got {:?}", received[0]);
        };
        assert_eq!(thread_id.as_str(), "T1");
        assert_eq!(content, "C");
        assert_eq!(sender_id.as_str(), "A");

        // The sender is not echoed.
        assert!(frames(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn first_message_with_recipient_opens_thread() {
        let h = Harness::new();
        let mut rx_b = h.connect("B");

        let frame = ClientFrame::Message {
            thread_id: ThreadId::from("dm-1"),
            content: "hello".into(),
            sender_id: None,
            recipient_id: Some(UserId::from("B")),
        };
        assert_eq!(h.router.route(&user("A"), frame).await.unwrap(), 1);
        assert_eq!(frames(&mut rx_b).len(), 1);
        assert_eq!(
            h.store.participants(&ThreadId::from("dm-1")).unwrap(),
            vec![UserId::from("A"), UserId::from("B")]
        );
    }

    /// Holds the first two participant lookups until both have read, so two
    /// senders race to open the same thread.
    struct RacingStore {
        inner: MemoryStore,
        gate: Barrier,
        lookups: std::sync::atomic::AtomicUsize,
    }

    impl MessageStore for RacingStore {
        fn participants(&self, thread_id: &ThreadId) -> anyhow::Result<Vec<UserId>> {
            let seen = self.inner.participants(thread_id)?;
            if self.lookups.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                self.gate.wait();
            }
            Ok(seen)
        }

        fn open_thread(&self, thread_id: &ThreadId, participants: &[UserId]) -> anyhow::Result<bool> {
            self.inner.open_thread(thread_id, participants)
        }

        fn append_message(
            &self,
            thread_id: &ThreadId,
            sender_id: &UserId,
            content: &str,
            sent_at: DateTime<Utc>,
        ) -> anyhow::Result<MessageId> {
            self.inner.append_message(thread_id, sender_id, content, sent_at)
        }

        fn mark_read(
            &self,
            thread_id: &ThreadId,
            message_id: &MessageId,
            reader_id: &UserId,
            read_at: DateTime<Utc>,
        ) -> anyhow::Result<Option<UserId>> {
            self.inner.mark_read(thread_id, message_id, reader_id, read_at)
        }

        fn set_reaction(
            &self,
            thread_id: &ThreadId,
            message_id: &MessageId,
            user_id: &UserId,
            emoji: &str,
            action: ReactionAction,
        ) -> anyhow::Result<ReactionOutcome> {
            self.inner.set_reaction(thread_id, message_id, user_id, emoji, action)
        }

        fn delete_message(
            &self,
            thread_id: &ThreadId,
            message_id: &MessageId,
            requester_id: &UserId,
            mode: DeleteMode,
            deleted_at: DateTime<Utc>,
        ) -> anyhow::Result<DeleteOutcome> {
            self.inner.delete_message(thread_id, message_id, requester_id, mode, deleted_at)
        }

        fn history(&self, thread_id: &ThreadId, limit: u32) -> anyhow::Result<Vec<StoredMessage>> {
            self.inner.history(thread_id, limit)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_first_messages_cannot_widen_a_thread() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            gate: Barrier::new(2),
            lookups: std::sync::atomic::AtomicUsize::new(0),
        });
        let registry = ConnectionRegistry::new();
        let router = EventRouter::new(store.clone(), DeliveryEngine::new(registry));

        let first = |to: &str| ClientFrame::Message {
            thread_id: ThreadId::from("dm-1"),
            content: "hi".into(),
            sender_id: None,
            recipient_id: Some(UserId::from(to)),
        };

        let (alice_user, mallory_user) = (user("alice"), user("mallory"));
        let (alice, mallory) = tokio::join!(
            router.route(&alice_user, first("bob")),
            router.route(&mallory_user, first("eve")),
        );

        // Exactly one sender opened the thread; the other was refused.
        assert!(alice.is_ok() != mallory.is_ok(), "alice: {:?} mallory: {:?}", alice, mallory);
        let refused = if alice.is_ok() { mallory } else { alice };
        assert!(matches!(refused, Err(ProtocolError::NotAParticipant(_))));

        let members = store.participants(&ThreadId::from("dm-1")).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(store.inner.history(&ThreadId::from("dm-1"), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_rules() {
        let h = Harness::new();
        h.thread("T1", &["A", "B"]);

        let spoofed = ClientFrame::Message {
            thread_id: ThreadId::from("T1"),
            content: "C".into(),
            sender_id: Some(UserId::from("B")),
            recipient_id: None,
        };
        assert!(matches!(
            h.router.route(&user("A"), spoofed).await,
            Err(ProtocolError::SenderMismatch)
        ));
        assert!(matches!(
            h.router.route(&user("A"), message("nowhere", "C")).await,
            Err(ProtocolError::UnknownThread(_))
        ));
        assert!(matches!(
            h.router.route(&user("M"), message("T1", "C")).await,
            Err(ProtocolError::NotAParticipant(_))
        ));
        assert!(h.store.history(&ThreadId::from("T1"), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_history() {
        let h = Harness::new();
        let thread = h.thread("T1", &["A", "B"]);

        let delivered = h.router.route(&user("A"), message("T1", "C")).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(h.store.history(&thread, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn typing_is_forwarded_but_never_stored() {
        let h = Harness::new();
        let _rx_a = h.connect("A");
        let mut rx_b = h.connect("B");
        let thread = h.thread("T1", &["A", "B"]);
        let writes = h.store.write_count();

        h.router
            .route(&user("A"), ClientFrame::TypingStart { thread_id: thread.clone() })
            .await
            .unwrap();
        h.router
            .route(&user("A"), ClientFrame::TypingStop { thread_id: thread.clone() })
            .await
            .unwrap();

        assert_eq!(h.store.write_count(), writes);
        assert!(h.store.history(&thread, 10).unwrap().is_empty());
        assert_eq!(
            frames(&mut rx_b),
            vec![
                ServerFrame::TypingStart { thread_id: thread.clone(), user_id: UserId::from("A") },
                ServerFrame::TypingStop { thread_id: thread, user_id: UserId::from("A") },
            ]
        );
    }

    #[tokio::test]
    async fn read_receipt_notifies_original_sender() {
        let h = Harness::new();
        let mut rx_a = h.connect("A");
        let thread = h.thread("T1", &["A", "B"]);
        let message_id = send(&h, "A", &thread, "C").await;

        let delivered = h
            .router
            .route(
                &user("B"),
                ClientFrame::ReadReceipt { thread_id: thread.clone(), message_id: message_id.clone() },
            )
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let received = frames(&mut rx_a);
        assert!(matches!(
            &received[..],
            [ServerFrame::ReadReceipt { reader_id, message_id: id, .. }]
                if reader_id.as_str() == "B" && id == &message_id
        ));

        // Reading your own message notifies nobody.
        let own = h
            .router
            .route(&user("A"), ClientFrame::ReadReceipt { thread_id: thread, message_id })
            .await
            .unwrap();
        assert_eq!(own, 0);
    }

    #[tokio::test]
    async fn reactions_notify_other_participants_on_change() {
        let h = Harness::new();
        let mut rx_a = h.connect("A");
        let mut rx_c = h.connect("C");
        let thread = h.thread("G", &["A", "B", "C"]);
        let message_id = send(&h, "A", &thread, "C").await;
        frames(&mut rx_c);

        let react = |action| ClientFrame::MessageReaction {
            thread_id: thread.clone(),
            message_id: message_id.clone(),
            emoji: "🎉".into(),
            action,
        };

        assert_eq!(h.router.route(&user("B"), react(ReactionAction::Add)).await.unwrap(), 2);
        assert_eq!(h.router.route(&user("B"), react(ReactionAction::Add)).await.unwrap(), 0);
        assert_eq!(h.router.route(&user("B"), react(ReactionAction::Remove)).await.unwrap(), 2);

        assert_eq!(frames(&mut rx_a).len(), 2);
        assert_eq!(frames(&mut rx_c).len(), 2);
    }

    #[tokio::test]
    async fn only_the_sender_can_delete() {
        let h = Harness::new();
        let mut rx_b = h.connect("B");
        let thread = h.thread("T1", &["A", "B"]);
        let message_id = send(&h, "A", &thread, "C").await;
        frames(&mut rx_b);

        let delete = |mode| ClientFrame::DeleteMessage {
            thread_id: thread.clone(),
            message_id: message_id.clone(),
            mode,
        };

        assert!(matches!(
            h.router.route(&user("B"), delete(DeleteMode::Soft)).await,
            Err(ProtocolError::Forbidden(_))
        ));
        assert_eq!(h.router.route(&user("A"), delete(DeleteMode::Hard)).await.unwrap(), 1);
        assert!(matches!(
            frames(&mut rx_b)[..],
            [ServerFrame::DeleteMessage { mode: DeleteMode::Hard, .. }]
        ));
        assert!(matches!(
            h.router.route(&user("A"), delete(DeleteMode::Hard)).await,
            Err(ProtocolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn soft_deleted_message_takes_no_receipts_or_reactions() {
        let h = Harness::new();
        let mut rx_a = h.connect("A");
        let thread = h.thread("T1", &["A", "B"]);
        let message_id = send(&h, "A", &thread, "C").await;

        h.router
            .route(
                &user("A"),
                ClientFrame::DeleteMessage {
                    thread_id: thread.clone(),
                    message_id: message_id.clone(),
                    mode: DeleteMode::Soft,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            h.router
                .route(
                    &user("B"),
                    ClientFrame::ReadReceipt { thread_id: thread.clone(), message_id: message_id.clone() },
                )
                .await,
            Err(ProtocolError::NotFound(_))
        ));
        assert!(matches!(
            h.router
                .route(
                    &user("B"),
                    ClientFrame::MessageReaction {
                        thread_id: thread,
                        message_id,
                        emoji: "👍".into(),
                        action: ReactionAction::Add,
                    },
                )
                .await,
            Err(ProtocolError::NotFound(_))
        ));
        assert!(frames(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn moderation_requires_role_and_drops_when_offline() {
        let h = Harness::new();
        let notify = || ClientFrame::ModerationNotification {
            user_id: UserId::from("A"),
            content_type: "post".into(),
            content_id: "p1".into(),
            action: ModerationAction::Remove,
        };

        let mut rx_a = h.connect("A");
        assert!(matches!(
            h.router.route(&user("B"), notify()).await,
            Err(ProtocolError::Forbidden(_))
        ));
        assert!(frames(&mut rx_a).is_empty());

        assert_eq!(h.router.route(&moderator("mod"), notify()).await.unwrap(), 1);
        assert_eq!(
            frames(&mut rx_a),
            vec![ServerFrame::ModerationNotification {
                content_type: "post".into(),
                content_id: "p1".into(),
                action: ModerationAction::Remove,
            }]
        );

        // A disconnects; the notification is dropped without error.
        h.registry.unregister(&UserId::from("A"));
        assert_eq!(h.router.route(&moderator("mod"), notify()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_auth_is_rejected() {
        let h = Harness::new();
        let frame = ClientFrame::Auth { token: "t".into(), user_id: None };
        assert!(matches!(
            h.router.route(&user("A"), frame).await,
            Err(ProtocolError::AlreadyAuthenticated)
        ));
    }
}
