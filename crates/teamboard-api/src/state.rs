use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use teamboard_db::Database;
use teamboard_gateway::auth::TokenVerifier;
use teamboard_gateway::publisher::EventPublisher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub verifier: TokenVerifier,
    pub publisher: EventPublisher,
}

impl AppStateInner {
    /// Run blocking DB work off the async runtime.
    ///
    /// The closure maps its own failures to a status; a panicked worker is a 500.
    pub async fn blocking<F, T>(&self, f: F) -> Result<T, StatusCode>
    where
        F: FnOnce(&Database) -> Result<T, StatusCode> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
    }
}

/// Log a storage error and collapse it to a 500.
pub fn internal(e: anyhow::Error) -> StatusCode {
    error!("database error: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
