//! Client side of the relay: key directory lookups, end-to-end encryption
//! of message bodies and a self-healing WebSocket session.

pub mod backoff;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod session;

pub use backoff::Backoff;
pub use conversation::{Conversation, MessageBody, ReceivedMessage};
pub use directory::KeyDirectory;
pub use error::ClientError;
pub use session::{RelaySession, SessionEvent, SessionHandle};
