use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use agora_db::Database;
use agora_gateway::Relay;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub relay: Relay,
    /// Shared secret for `/internal` callers. `None` disables those routes.
    pub service_token: Option<String>,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, relay: Relay, service_token: Option<String>) -> AppState {
        Arc::new(Self {
            db,
            relay,
            service_token,
        })
    }
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
