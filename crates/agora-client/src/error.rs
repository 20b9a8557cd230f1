use thiserror::Error;

use agora_crypto::CryptoError;
use agora_types::UserId;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("{0} has not published a public key")]
    NoPublicKey(UserId),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relay rejected the session: {0}")]
    Rejected(String),

    #[error("handshake did not complete: {0}")]
    Handshake(String),

    #[error("this session was replaced by a newer login")]
    Superseded,

    #[error("session is no longer running")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl ClientError {
    /// Errors that reconnecting cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Superseded)
    }
}
