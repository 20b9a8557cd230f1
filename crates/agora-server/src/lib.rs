//! Relay server assembly: storage, relay, REST routes and the WebSocket
//! upgrade, wired into one axum `Router`.

pub mod config;

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use agora_api::AppStateInner;
use agora_api::middleware::bearer_token;
use agora_db::Database;
use agora_gateway::{MessageStore, Relay, TokenVerifier, connection};

pub use config::Config;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Open storage and build the full application router.
pub fn build_app(config: &Config) -> anyhow::Result<Router> {
    build_app_with_relay(config).map(|(app, _)| app)
}

/// Like [`build_app`], also handing back the relay so in-process
/// collaborators can push frames.
pub fn build_app_with_relay(config: &Config) -> anyhow::Result<(Router, Relay)> {
    let db = if config.db_path == config::MEMORY_DB {
        info!("using in-memory storage");
        Database::open_in_memory()?
    } else {
        Database::open(Path::new(&config.db_path))?
    };
    let db = Arc::new(db);

    let store: Arc<dyn MessageStore> = db.clone();
    let relay = Relay::new(
        store,
        TokenVerifier::from_secret(&config.jwt_secret),
        config.gateway.clone(),
    );

    if config.service_token.is_none() {
        info!("AGORA_SERVICE_TOKEN not set, internal push endpoints are disabled");
    }

    let api_state = AppStateInner::new(db, relay.clone(), config.service_token.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(relay.clone());

    let app = Router::new()
        .merge(agora_api::router(api_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    Ok((app, relay))
}

/// A token in the `Authorization` header or `?token=` is verified before the
/// upgrade. Without one the socket must send an `auth` frame.
async fn ws_upgrade(
    State(relay): State<Relay>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers).or(query.token);

    let Some(token) = token else {
        return ws
            .on_upgrade(move |socket| connection::handle_connection(socket, relay))
            .into_response();
    };

    let verified = relay.verifier().verify(&token);
    match verified {
        Ok(identity) => ws
            .on_upgrade(move |socket| connection::handle_connection_authenticated(socket, relay, identity))
            .into_response(),
        Err(e) => {
            debug!("rejected upgrade: {}", e);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
