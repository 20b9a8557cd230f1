use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use agora_gateway::{Identity, MessageStore};
use agora_types::ThreadId;
use agora_types::api::{CreateThreadRequest, CreateThreadResponse, MessageHistoryResponse};

use crate::state::{AppState, blocking};

const MAX_HISTORY: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Create a thread between the caller and `participantIds`.
pub async fn create_thread(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let mut participants = vec![identity.user_id.clone()];
    for id in req.participant_ids {
        if id.as_str().is_empty() {
            return Err(StatusCode::BAD_REQUEST);
        }
        if !participants.contains(&id) {
            participants.push(id);
        }
    }
    if participants.len() < 2 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let thread_id = ThreadId::new(Uuid::new_v4().to_string());

    let (thread, members) = (thread_id.clone(), participants.clone());
    if !blocking(&state, move |db| db.open_thread(&thread, &members)).await? {
        return Err(StatusCode::CONFLICT);
    }

    info!(
        "{} created thread {} with {} participants",
        identity.user_id,
        thread_id,
        participants.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateThreadResponse {
            thread_id,
            participant_ids: participants,
        }),
    ))
}

/// Ciphertext history, oldest first. Participants only.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<ThreadId>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, MAX_HISTORY);

    let thread = thread_id.clone();
    let participants = blocking(&state, move |db| db.participants(&thread)).await?;
    if participants.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    if !participants.contains(&identity.user_id) {
        return Err(StatusCode::FORBIDDEN);
    }

    let messages = blocking(&state, move |db| db.history(&thread_id, limit)).await?;
    Ok(Json(MessageHistoryResponse { messages }))
}
