use reqwest::StatusCode;
use tracing::debug;

use agora_types::UserId;
use agora_types::api::{PublicKeyResponse, PublishKeyRequest};

use crate::error::ClientError;

/// HTTP client for the relay's public-key directory.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl KeyDirectory {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// A user's published public key (base64 SPKI).
    pub async fn public_key(&self, user_id: &UserId) -> Result<String, ClientError> {
        let url = format!("{}/users/{}/public-key", self.base_url, user_id);
        let resp = self.http.get(&url).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(ClientError::NoPublicKey(user_id.clone())),
            status if !status.is_success() => Err(ClientError::Status(status)),
            _ => {
                let body: PublicKeyResponse = resp.json().await?;
                debug!("fetched public key for {}", user_id);
                Ok(body.public_key)
            }
        }
    }

    /// Publish our own public key, replacing any earlier one.
    pub async fn publish(&self, public_key: &str) -> Result<PublicKeyResponse, ClientError> {
        let resp = self
            .http
            .put(format!("{}/keys", self.base_url))
            .bearer_auth(&self.token)
            .json(&PublishKeyRequest {
                public_key: public_key.to_string(),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }
}
