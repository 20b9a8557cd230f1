use serde_json::Value;
use thiserror::Error;

use agora_types::frames::{ClientFrame, ServerFrame};
use agora_types::{MessageId, ThreadId};

/// Everything that can go wrong with a single inbound frame. None of these
/// close the connection except a failed handshake.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` frame: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("authenticate with an `auth` frame first")]
    Unauthenticated,

    #[error("connection is already authenticated")]
    AlreadyAuthenticated,

    #[error("authentication token rejected")]
    InvalidToken,

    #[error("connection is closed")]
    SessionClosed,

    #[error("senderId does not match the authenticated user")]
    SenderMismatch,

    #[error("thread {0} is unknown")]
    UnknownThread(ThreadId),

    #[error("not a participant of thread {0}")]
    NotAParticipant(ThreadId),

    #[error("message {0} not found")]
    NotFound(MessageId),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("the frame could not be stored, try again")]
    PersistenceFailed,
}

impl ProtocolError {
    /// Stable machine-readable code sent in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::Unauthenticated => "unauthenticated",
            Self::AlreadyAuthenticated => "already_authenticated",
            Self::InvalidToken => "invalid_token",
            Self::SessionClosed => "session_closed",
            Self::SenderMismatch => "sender_mismatch",
            Self::UnknownThread(_) => "unknown_thread",
            Self::NotAParticipant(_) => "not_a_participant",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::PersistenceFailed => "persistence_failed",
        }
    }

    pub fn to_frame(&self) -> ServerFrame {
        ServerFrame::Error {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Decode one text frame, telling apart garbage, unknown kinds and known
/// kinds with a bad payload.
pub fn decode_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => return Err(ProtocolError::Malformed("`type` must be a string".into())),
        None => return Err(ProtocolError::Malformed("missing `type` field".into())),
    };

    if !ClientFrame::KINDS.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

/// First `max` characters of a raw frame, for logs.
pub fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
