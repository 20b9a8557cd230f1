use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ThreadId, UserId};

/// Frames sent FROM client TO server over the relay socket.
///
/// Every frame is a JSON object whose `type` field selects the variant;
/// the remaining fields are camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind the connection to the identity carried by a verified token.
    #[serde(rename_all = "camelCase")]
    Auth {
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },

    /// An end-to-end encrypted message. `content` is opaque ciphertext.
    #[serde(rename_all = "camelCase")]
    Message {
        thread_id: ThreadId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<UserId>,
    },

    #[serde(rename_all = "camelCase")]
    ReadReceipt {
        thread_id: ThreadId,
        message_id: MessageId,
    },

    #[serde(rename_all = "camelCase")]
    MessageReaction {
        thread_id: ThreadId,
        message_id: MessageId,
        emoji: String,
        #[serde(default)]
        action: ReactionAction,
    },

    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        thread_id: ThreadId,
        message_id: MessageId,
        #[serde(default)]
        mode: DeleteMode,
    },

    #[serde(rename_all = "camelCase")]
    TypingStart { thread_id: ThreadId },

    #[serde(rename_all = "camelCase")]
    TypingStop { thread_id: ThreadId },

    /// Moderation outcome for a piece of the target user's content.
    /// Only honoured from connections holding the moderator role.
    #[serde(rename_all = "camelCase")]
    ModerationNotification {
        user_id: UserId,
        content_type: String,
        content_id: String,
        action: ModerationAction,
    },
}

impl ClientFrame {
    /// Every `type` tag a client may send.
    pub const KINDS: &'static [&'static str] = &[
        "auth",
        "message",
        "read_receipt",
        "message_reaction",
        "delete_message",
        "typing_start",
        "typing_stop",
        "moderation_notification",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Message { .. } => "message",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::MessageReaction { .. } => "message_reaction",
            Self::DeleteMessage { .. } => "delete_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::ModerationNotification { .. } => "moderation_notification",
        }
    }
}

/// Frames pushed FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake completed; the connection is now registered.
    #[serde(rename_all = "camelCase")]
    Ready { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    Message {
        thread_id: ThreadId,
        content: String,
        sender_id: UserId,
        message_id: MessageId,
        sent_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    ReadReceipt {
        thread_id: ThreadId,
        message_id: MessageId,
        reader_id: UserId,
        read_at: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MessageReaction {
        thread_id: ThreadId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
        action: ReactionAction,
    },

    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        thread_id: ThreadId,
        message_id: MessageId,
        deleted_by: UserId,
        mode: DeleteMode,
    },

    #[serde(rename_all = "camelCase")]
    TypingStart { thread_id: ThreadId, user_id: UserId },

    #[serde(rename_all = "camelCase")]
    TypingStop { thread_id: ThreadId, user_id: UserId },

    #[serde(rename_all = "camelCase")]
    ModerationNotification {
        content_type: String,
        content_id: String,
        action: ModerationAction,
    },

    /// Structured protocol error returned to the sender of a bad frame.
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Message { .. } => "message",
            Self::ReadReceipt { .. } => "read_receipt",
            Self::MessageReaction { .. } => "message_reaction",
            Self::DeleteMessage { .. } => "delete_message",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::ModerationNotification { .. } => "moderation_notification",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    #[default]
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Blank the content but keep a tombstone in history.
    #[default]
    Soft,
    /// Remove the message and everything attached to it.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Approve,
    Remove,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Remove => "remove",
        }
    }
}
