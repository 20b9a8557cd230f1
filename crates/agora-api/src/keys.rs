use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use agora_gateway::Identity;
use agora_types::UserId;
use agora_types::api::{PublicKeyResponse, PublishKeyRequest};

use crate::state::{AppState, blocking};

/// Publish (or rotate) the caller's RSA public key.
pub async fn publish_key(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<PublishKeyRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let public_key = req.public_key.trim().to_string();

    if let Err(e) = agora_crypto::import_public_key(&public_key) {
        warn!("{} published an unusable key: {}", identity.user_id, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    let updated_at = Utc::now();
    let user_id = identity.user_id.clone();
    let stored_key = public_key.clone();
    blocking(&state, move |db| {
        db.upsert_public_key(user_id.as_str(), &stored_key, &updated_at.to_rfc3339())
    })
    .await?;

    info!("{} published a public key", identity.user_id);

    Ok(Json(PublicKeyResponse {
        user_id: identity.user_id,
        public_key,
        updated_at,
    }))
}

pub async fn get_public_key(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<impl IntoResponse, StatusCode> {
    let lookup = user_id.clone();
    let row = blocking(&state, move |db| db.get_public_key(lookup.as_str()))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    let updated_at = DateTime::parse_from_rfc3339(&row.updated_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(PublicKeyResponse {
        user_id,
        public_key: row.public_key,
        updated_at,
    }))
}
