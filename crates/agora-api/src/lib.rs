//! REST surface of the relay: public-key directory, thread creation and
//! history, and internal push endpoints for collaborators.

pub mod internal;
pub mod keys;
pub mod middleware;
pub mod state;
pub mod threads;

use axum::{
    Router, middleware as mw,
    routing::{get, post, put},
};

pub use state::{AppState, AppStateInner};

/// All REST routes, ready to merge into the server's router.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/users/{user_id}/public-key", get(keys::get_public_key))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/keys", put(keys::publish_key))
        .route("/threads", post(threads::create_thread))
        .route("/threads/{thread_id}/messages", get(threads::get_messages))
        .layer(mw::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state.clone());

    let internal_routes = Router::new()
        .route("/internal/moderation-notifications", post(internal::push_moderation))
        .route("/internal/users/{user_id}/frames", post(internal::push_frame))
        .layer(mw::from_fn_with_state(state.clone(), middleware::require_service_token))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(internal_routes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use agora_db::Database;
    use agora_gateway::handshake::issue_token;
    use agora_gateway::registry::{ConnectionHandle, Outbound};
    use agora_gateway::{GatewayConfig, MessageStore, Relay, TokenVerifier};
    use agora_types::UserId;

    use super::*;

    const SECRET: &str = "api-test-secret";
    const SERVICE: &str = "svc-token";

    fn state(service_token: Option<&str>) -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store: Arc<dyn MessageStore> = db.clone();
        let relay = Relay::new(store, TokenVerifier::from_secret(SECRET), GatewayConfig::default());
        AppStateInner::new(db, relay, service_token.map(str::to_string))
    }

    fn token(user: &str) -> String {
        issue_token(SECRET, &UserId::from(user), &[], Duration::from_secs(600)).unwrap()
    }

    fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(bearer) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn publish_then_fetch_public_key() {
        let app = router(state(None));
        let pair = agora_crypto::generate_key_pair().unwrap();
        let alice = token("alice");

        let (status, _) = call(
            &app,
            request("PUT", "/keys", Some(&alice), Some(json!({ "publicKey": pair.public_key }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, request("GET", "/users/alice/public-key", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], "alice");
        assert_eq!(body["publicKey"], pair.public_key.as_str());

        let (status, _) = call(&app, request("GET", "/users/bob/public-key", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn key_publishing_is_validated() {
        let app = router(state(None));

        let (status, _) = call(
            &app,
            request("PUT", "/keys", Some(&token("alice")), Some(json!({ "publicKey": "bm9wZQ==" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, request("PUT", "/keys", None, Some(json!({ "publicKey": "x" })))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            request("PUT", "/keys", Some("not-a-jwt"), Some(json!({ "publicKey": "x" }))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn thread_history_is_for_participants_only() {
        let state = state(None);
        let app = router(state.clone());

        let (status, body) = call(
            &app,
            request("POST", "/threads", Some(&token("alice")), Some(json!({ "participantIds": ["bob"] }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["participantIds"], json!(["alice", "bob"]));
        let thread_id = body["threadId"].as_str().unwrap().to_string();

        let thread = agora_types::ThreadId::from(thread_id.as_str());
        state
            .db
            .append_message(&thread, &UserId::from("alice"), "ciphertext", chrono::Utc::now())
            .unwrap();

        let uri = format!("/threads/{}/messages?limit=10", thread_id);
        let (status, body) = call(&app, request("GET", &uri, Some(&token("bob")), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["content"], "ciphertext");
        assert_eq!(body["messages"][0]["senderId"], "alice");

        let (status, _) = call(&app, request("GET", &uri, Some(&token("mallory")), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            request("GET", "/threads/missing/messages", Some(&token("bob")), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn thread_needs_another_participant() {
        let app = router(state(None));
        let (status, _) = call(
            &app,
            request("POST", "/threads", Some(&token("alice")), Some(json!({ "participantIds": ["alice"] }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_routes_require_service_token() {
        let body = json!({
            "userId": "alice",
            "contentType": "post",
            "contentId": "p1",
            "action": "remove",
        });

        let disabled = router(state(None));
        let (status, _) = call(
            &disabled,
            request("POST", "/internal/moderation-notifications", Some(SERVICE), Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let app = router(state(Some(SERVICE)));
        let (status, _) = call(
            &app,
            request("POST", "/internal/moderation-notifications", Some(&token("alice")), Some(body.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, resp) = call(
            &app,
            request("POST", "/internal/moderation-notifications", Some(SERVICE), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp, json!({ "delivered": false }));
    }

    #[tokio::test]
    async fn internal_push_reaches_live_connection() {
        let state = state(Some(SERVICE));
        let app = router(state.clone());
        let (conn, mut rx) = ConnectionHandle::new(UserId::from("alice"));
        state.relay.registry().register(conn);

        let frame = json!({
            "type": "moderation_notification",
            "contentType": "comment",
            "contentId": "c1",
            "action": "approve",
        });
        let (status, resp) = call(
            &app,
            request("POST", "/internal/users/alice/frames", Some(SERVICE), Some(frame)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp, json!({ "delivered": true }));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(_))));
    }
}
