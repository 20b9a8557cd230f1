use agora_types::models::StoredMessage;
use agora_types::{MessageId, ThreadId, UserId};
use chrono::{DateTime, Utc};

// Row types map directly to SQLite rows; `into_model` converts to the
// shared agora-types models.

pub struct MessageRow {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
    pub deleted_at: Option<String>,
}

pub struct PublicKeyRow {
    pub user_id: String,
    pub public_key: String,
    pub updated_at: String,
}

impl MessageRow {
    pub fn into_model(self) -> anyhow::Result<StoredMessage> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc);
        Ok(StoredMessage {
            id: MessageId::new(self.id),
            thread_id: ThreadId::new(self.thread_id),
            sender_id: UserId::new(self.sender_id),
            content: self.content,
            created_at,
            deleted: self.deleted_at.is_some(),
        })
    }
}
