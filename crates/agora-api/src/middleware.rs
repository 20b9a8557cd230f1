use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::debug;

use crate::state::AppState;

/// Bearer token from the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Verify the caller's JWT and stash their `Identity` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let identity = state.relay.verifier().verify(&token).map_err(|e| {
        debug!("rejected bearer token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Gate for collaborator endpoints. Without a configured service token the
/// routes behave as if they did not exist.
pub async fn require_service_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = state.service_token.as_deref().ok_or(StatusCode::NOT_FOUND)?;
    let presented = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}

/// Compare secrets in time independent of where they first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
