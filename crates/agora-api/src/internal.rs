//! Push endpoints for server-side collaborators (moderation workflow and
//! friends). Guarded by the service token, never by user JWTs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use agora_types::UserId;
use agora_types::api::{ModerationNotificationRequest, PushResponse};
use agora_types::frames::ServerFrame;

use crate::state::AppState;

pub async fn push_moderation(
    State(state): State<AppState>,
    Json(req): Json<ModerationNotificationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let delivery = state.relay.notify_moderation(
        &req.user_id,
        req.content_type,
        req.content_id,
        req.action,
    );

    Ok(Json(PushResponse {
        delivered: delivery.is_delivered(),
    }))
}

pub async fn push_frame(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(frame): Json<ServerFrame>,
) -> Result<impl IntoResponse, StatusCode> {
    let delivery = state.relay.deliver(&user_id, &frame);
    info!("pushed {} frame to {}: {:?}", frame.kind(), user_id, delivery);

    Ok(Json(PushResponse {
        delivered: delivery.is_delivered(),
    }))
}
