use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ThreadId, UserId};

/// A message as the persistence collaborator keeps it.
/// `content` is the ciphertext exactly as the sender produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}
