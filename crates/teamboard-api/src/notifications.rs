use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use teamboard_types::api::Claims;

use crate::state::AppState;

/// The caller's most recent notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let list = state
        .publisher
        .notifications()
        .list_for_user(claims.sub)
        .await
        .map_err(|e| {
            error!("listing notifications for {} failed: {}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(list))
}
