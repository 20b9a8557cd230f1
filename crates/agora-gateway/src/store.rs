use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use agora_db::Database;
use agora_types::frames::{DeleteMode, ReactionAction};
use agora_types::models::StoredMessage;
use agora_types::{MessageId, ThreadId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOutcome {
    Changed,
    Unchanged,
    MessageNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotAuthor,
}

/// Persistence collaborator behind the router.
///
/// Calls are synchronous and the router runs them on the blocking pool.
/// The relay hands over ciphertext only; implementations never see plaintext.
/// Typing indicators never reach this trait.
pub trait MessageStore: Send + Sync + 'static {
    /// Participants of a thread, empty if the thread is unknown.
    fn participants(&self, thread_id: &ThreadId) -> Result<Vec<UserId>>;

    /// Atomically create a thread with exactly these participants. Returns
    /// false, changing nothing, if the thread already exists.
    fn open_thread(&self, thread_id: &ThreadId, participants: &[UserId]) -> Result<bool>;

    fn append_message(
        &self,
        thread_id: &ThreadId,
        sender_id: &UserId,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<MessageId>;

    /// Record a read receipt. Returns the message's sender, or `None` if the
    /// message does not exist in the thread or was deleted.
    fn mark_read(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        reader_id: &UserId,
        read_at: DateTime<Utc>,
    ) -> Result<Option<UserId>>;

    fn set_reaction(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<ReactionOutcome>;

    /// Delete a message on behalf of `requester_id`; only its sender may.
    fn delete_message(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        requester_id: &UserId,
        mode: DeleteMode,
        deleted_at: DateTime<Utc>,
    ) -> Result<DeleteOutcome>;

    /// Newest `limit` messages, oldest first.
    fn history(&self, thread_id: &ThreadId, limit: u32) -> Result<Vec<StoredMessage>>;
}

/// In-process store. Used by tests and when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    writes: AtomicUsize,
}

#[derive(Default)]
struct MemoryInner {
    threads: HashMap<ThreadId, BTreeSet<UserId>>,
    messages: Vec<StoredMessage>,
    receipts: HashSet<(MessageId, UserId)>,
    reactions: HashSet<(MessageId, UserId, String)>,
}

impl MemoryInner {
    fn position(&self, thread_id: &ThreadId, message_id: &MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| &m.id == message_id && &m.thread_id == thread_id)
    }

    /// Like `position`, skipping tombstones.
    fn live_position(&self, thread_id: &ThreadId, message_id: &MessageId) -> Option<usize> {
        self.position(thread_id, message_id)
            .filter(|&pos| !self.messages[pos].deleted)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("memory store lock poisoned: {}", e))
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl MessageStore for MemoryStore {
    fn participants(&self, thread_id: &ThreadId) -> Result<Vec<UserId>> {
        let inner = self.lock()?;
        Ok(inner
            .threads
            .get(thread_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn open_thread(&self, thread_id: &ThreadId, participants: &[UserId]) -> Result<bool> {
        self.wrote();
        let mut inner = self.lock()?;
        if inner.threads.contains_key(thread_id) {
            return Ok(false);
        }
        inner
            .threads
            .insert(thread_id.clone(), participants.iter().cloned().collect());
        Ok(true)
    }

    fn append_message(
        &self,
        thread_id: &ThreadId,
        sender_id: &UserId,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<MessageId> {
        self.wrote();
        let mut inner = self.lock()?;
        if !inner.threads.contains_key(thread_id) {
            return Err(anyhow!("thread {} does not exist", thread_id));
        }

        let id = MessageId::new(Uuid::new_v4().to_string());
        inner.messages.push(StoredMessage {
            id: id.clone(),
            thread_id: thread_id.clone(),
            sender_id: sender_id.clone(),
            content: content.to_string(),
            created_at: sent_at,
            deleted: false,
        });
        Ok(id)
    }

    fn mark_read(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        reader_id: &UserId,
        _read_at: DateTime<Utc>,
    ) -> Result<Option<UserId>> {
        self.wrote();
        let mut inner = self.lock()?;
        let Some(pos) = inner.live_position(thread_id, message_id) else {
            return Ok(None);
        };
        let sender = inner.messages[pos].sender_id.clone();
        inner.receipts.insert((message_id.clone(), reader_id.clone()));
        Ok(Some(sender))
    }

    fn set_reaction(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<ReactionOutcome> {
        self.wrote();
        let mut inner = self.lock()?;
        if inner.live_position(thread_id, message_id).is_none() {
            return Ok(ReactionOutcome::MessageNotFound);
        }

        let key = (message_id.clone(), user_id.clone(), emoji.to_string());
        let changed = match action {
            ReactionAction::Add => inner.reactions.insert(key),
            ReactionAction::Remove => inner.reactions.remove(&key),
        };
        Ok(if changed {
            ReactionOutcome::Changed
        } else {
            ReactionOutcome::Unchanged
        })
    }

    fn delete_message(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        requester_id: &UserId,
        mode: DeleteMode,
        _deleted_at: DateTime<Utc>,
    ) -> Result<DeleteOutcome> {
        self.wrote();
        let mut inner = self.lock()?;
        let Some(pos) = inner.position(thread_id, message_id) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if &inner.messages[pos].sender_id != requester_id {
            return Ok(DeleteOutcome::NotAuthor);
        }

        match mode {
            DeleteMode::Soft => {
                let message = &mut inner.messages[pos];
                if message.deleted {
                    return Ok(DeleteOutcome::NotFound);
                }
                message.deleted = true;
                message.content.clear();
            }
            DeleteMode::Hard => {
                inner.messages.remove(pos);
                inner.receipts.retain(|(id, _)| id != message_id);
                inner.reactions.retain(|(id, _, _)| id != message_id);
            }
        }
        Ok(DeleteOutcome::Deleted)
    }

    fn history(&self, thread_id: &ThreadId, limit: u32) -> Result<Vec<StoredMessage>> {
        let inner = self.lock()?;
        let thread: Vec<&StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| &m.thread_id == thread_id)
            .collect();
        let skip = thread.len().saturating_sub(limit as usize);
        Ok(thread.into_iter().skip(skip).cloned().collect())
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl MessageStore for Database {
    fn participants(&self, thread_id: &ThreadId) -> Result<Vec<UserId>> {
        Ok(self
            .thread_participants(thread_id.as_str())?
            .into_iter()
            .map(UserId::new)
            .collect())
    }

    fn open_thread(&self, thread_id: &ThreadId, participants: &[UserId]) -> Result<bool> {
        let ids: Vec<&str> = participants.iter().map(UserId::as_str).collect();
        self.create_thread(thread_id.as_str(), &ids)
    }

    fn append_message(
        &self,
        thread_id: &ThreadId,
        sender_id: &UserId,
        content: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<MessageId> {
        let id = Uuid::new_v4().to_string();
        self.insert_message(
            &id,
            thread_id.as_str(),
            sender_id.as_str(),
            content,
            &timestamp(sent_at),
        )?;
        Ok(MessageId::new(id))
    }

    fn mark_read(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        reader_id: &UserId,
        read_at: DateTime<Utc>,
    ) -> Result<Option<UserId>> {
        let Some(sender) = self.message_sender(thread_id.as_str(), message_id.as_str())? else {
            return Ok(None);
        };
        Database::mark_read(self, message_id.as_str(), reader_id.as_str(), &timestamp(read_at))?;
        Ok(Some(UserId::new(sender)))
    }

    fn set_reaction(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
        action: ReactionAction,
    ) -> Result<ReactionOutcome> {
        if self.message_sender(thread_id.as_str(), message_id.as_str())?.is_none() {
            return Ok(ReactionOutcome::MessageNotFound);
        }

        let changed = match action {
            ReactionAction::Add => self.add_reaction(message_id.as_str(), user_id.as_str(), emoji)?,
            ReactionAction::Remove => {
                self.remove_reaction(message_id.as_str(), user_id.as_str(), emoji)?
            }
        };
        Ok(if changed {
            ReactionOutcome::Changed
        } else {
            ReactionOutcome::Unchanged
        })
    }

    fn delete_message(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        requester_id: &UserId,
        mode: DeleteMode,
        deleted_at: DateTime<Utc>,
    ) -> Result<DeleteOutcome> {
        let Some(sender) = self.message_author(thread_id.as_str(), message_id.as_str())? else {
            return Ok(DeleteOutcome::NotFound);
        };
        if sender != requester_id.as_str() {
            return Ok(DeleteOutcome::NotAuthor);
        }

        let deleted = match mode {
            DeleteMode::Soft => {
                self.soft_delete_message(message_id.as_str(), &timestamp(deleted_at))?
            }
            DeleteMode::Hard => self.hard_delete_message(message_id.as_str())?,
        };
        Ok(if deleted {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    fn history(&self, thread_id: &ThreadId, limit: u32) -> Result<Vec<StoredMessage>> {
        self.get_messages(thread_id.as_str(), limit)?
            .into_iter()
            .map(|row| row.into_model())
            .collect()
    }
}
