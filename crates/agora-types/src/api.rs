use serde::{Deserialize, Serialize};

use crate::frames::ModerationAction;
use crate::ids::{ThreadId, UserId};
use crate::models::StoredMessage;

// -- JWT Claims --

/// Claims of the bearer tokens issued by the external auth service.
/// Verified both at the WebSocket handshake and by the REST middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

pub const MODERATOR_ROLE: &str = "moderator";

// -- Keys --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PublishKeyRequest {
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub user_id: UserId,
    pub public_key: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

// -- Threads --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub participant_ids: Vec<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadResponse {
    pub thread_id: ThreadId,
    pub participant_ids: Vec<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageHistoryResponse {
    pub messages: Vec<StoredMessage>,
}

// -- Internal push --

/// Push request from the moderation workflow.
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ModerationNotificationRequest {
    pub user_id: UserId,
    pub content_type: String,
    pub content_id: String,
    pub action: ModerationAction,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushResponse {
    pub delivered: bool,
}
