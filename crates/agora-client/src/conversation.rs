use chrono::{DateTime, Utc};
use tracing::warn;

use agora_crypto::{decrypt, encrypt, import_public_key, is_sealed, max_plaintext_len, open, seal};
use agora_types::frames::{ClientFrame, ServerFrame};
use agora_types::{MessageId, ThreadId, UserId};

use crate::directory::KeyDirectory;
use crate::error::ClientError;

/// Decrypted body of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Plaintext(String),
    /// Wrong key, tampering or garbage. Only this message is affected.
    Undecryptable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub thread_id: ThreadId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub sent_at: DateTime<Utc>,
    pub body: MessageBody,
}

/// A direct-message thread with one partner, end-to-end encrypted.
///
/// Short bodies use plain RSA-OAEP so browser clients can read them; bodies
/// over the OAEP limit go into a sealed envelope.
pub struct Conversation {
    thread_id: ThreadId,
    partner: UserId,
    partner_key: String,
    oaep_limit: usize,
    own_private_key: String,
}

impl Conversation {
    pub fn new(
        thread_id: ThreadId,
        partner: UserId,
        partner_public_key: String,
        own_private_key: String,
    ) -> Result<Self, ClientError> {
        let key = import_public_key(&partner_public_key)?;

        Ok(Self {
            thread_id,
            partner,
            oaep_limit: max_plaintext_len(&key),
            partner_key: partner_public_key,
            own_private_key,
        })
    }

    /// Look the partner's key up in the directory and start the conversation.
    pub async fn open(
        directory: &KeyDirectory,
        thread_id: ThreadId,
        partner: UserId,
        own_private_key: String,
    ) -> Result<Self, ClientError> {
        let partner_key = directory.public_key(&partner).await?;
        Self::new(thread_id, partner, partner_key, own_private_key)
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn partner(&self) -> &UserId {
        &self.partner
    }

    pub fn encrypt_body(&self, plaintext: &str) -> Result<String, ClientError> {
        let body = if plaintext.len() <= self.oaep_limit {
            encrypt(plaintext, &self.partner_key)?
        } else {
            seal(plaintext, &self.partner_key)?
        };
        Ok(body)
    }

    /// Any failure yields `Undecryptable`; it never poisons the conversation.
    pub fn decrypt_body(&self, content: &str) -> MessageBody {
        let result = if is_sealed(content) {
            open(content, &self.own_private_key)
        } else {
            decrypt(content, &self.own_private_key)
        };

        match result {
            Ok(plaintext) => MessageBody::Plaintext(plaintext),
            Err(e) => {
                warn!("could not decrypt message in thread {}: {}", self.thread_id, e);
                MessageBody::Undecryptable
            }
        }
    }

    /// Encrypt `plaintext` into a ready-to-send `message` frame.
    pub fn outgoing(&self, plaintext: &str) -> Result<ClientFrame, ClientError> {
        Ok(ClientFrame::Message {
            thread_id: self.thread_id.clone(),
            content: self.encrypt_body(plaintext)?,
            sender_id: None,
            recipient_id: Some(self.partner.clone()),
        })
    }

    /// Decrypt an inbound `message` frame for this thread. Other frames and
    /// other threads yield `None`.
    pub fn receive(&self, frame: &ServerFrame) -> Option<ReceivedMessage> {
        let ServerFrame::Message {
            thread_id,
            content,
            sender_id,
            message_id,
            sent_at,
        } = frame
        else {
            return None;
        };

        if thread_id != &self.thread_id {
            return None;
        }

        Some(ReceivedMessage {
            thread_id: thread_id.clone(),
            message_id: message_id.clone(),
            sender_id: sender_id.clone(),
            sent_at: *sent_at,
            body: self.decrypt_body(content),
        })
    }
}
