use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use teamboard_gateway::auth::bearer_token;

use crate::state::AppState;

/// Extract and validate the JWT from the Authorization header.
///
/// On success the decoded [`Claims`](teamboard_types::api::Claims) are placed
/// in the request extensions for handlers to pick up.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(req.headers())
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = state.verifier.verify(token).map_err(|e| {
        debug!("rejected bearer token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
