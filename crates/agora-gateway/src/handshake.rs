use std::time::Duration;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use agora_types::UserId;
use agora_types::api::{Claims, MODERATOR_ROLE};

/// Who a connection belongs to, as proven by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn is_moderator(&self) -> bool {
        self.roles.iter().any(|r| r == MODERATOR_ROLE)
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            roles: claims.roles,
        }
    }
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no token presented")]
    MissingToken,

    #[error("token rejected: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("claimed user {claimed} does not match token subject {subject}")]
    SubjectMismatch { claimed: UserId, subject: UserId },
}

/// Verifies the HS256 bearer tokens issued by the auth service.
///
/// The relay never trusts a bare claimed user id: a connection is bound to
/// the subject of a valid, unexpired token or not at all.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, HandshakeError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(HandshakeError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(data.claims.into())
    }

    /// Verify an `auth` frame. A `userId` sent alongside the token must
    /// name the token's own subject.
    pub fn authenticate(
        &self,
        token: &str,
        claimed: Option<&UserId>,
    ) -> Result<Identity, HandshakeError> {
        let identity = self.verify(token)?;

        if let Some(claimed) = claimed {
            if claimed != &identity.user_id {
                return Err(HandshakeError::SubjectMismatch {
                    claimed: claimed.clone(),
                    subject: identity.user_id,
                });
            }
        }

        Ok(identity)
    }
}

/// Mint a token the way the auth service does. Used by tests and local tooling.
pub fn issue_token(
    secret: &str,
    user_id: &UserId,
    roles: &[&str],
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: user_id.clone(),
        exp: (chrono::Utc::now().timestamp() as u64 + ttl.as_secs()) as usize,
        roles: roles.iter().map(|r| r.to_string()).collect(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
