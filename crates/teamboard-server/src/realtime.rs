use std::time::Duration;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use teamboard_gateway::auth::bearer_token;
use teamboard_gateway::connection;
use teamboard_gateway::lifecycle::ConnectionManager;

#[derive(Clone)]
pub struct RealtimeState {
    pub manager: ConnectionManager,
    pub identify_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub token: Option<String>,
}

/// `GET /realtime`. A token in the header or query string is checked before
/// the upgrade; without one the socket must identify itself in its first frame.
pub async fn ws_upgrade(
    State(state): State<RealtimeState>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match bearer_token(&headers) {
        Ok(Some(token)) => Some(token.to_string()),
        Ok(None) => query.token,
        Err(e) => {
            warn!("Realtime upgrade rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let claims = match token {
        Some(token) => match state.manager.authenticate(Some(&token)) {
            Ok(claims) => Some(claims),
            Err(e) => {
                warn!("Realtime upgrade rejected: {}", e);
                return StatusCode::UNAUTHORIZED.into_response();
            }
        },
        None => None,
    };

    let RealtimeState {
        manager,
        identify_timeout,
    } = state;
    ws.on_upgrade(move |socket| connection::handle_socket(socket, manager, claims, identify_timeout))
}
