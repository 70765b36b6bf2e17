//! REST surface for todos and notifications.
//!
//! Every mutating handler commits first and only then hands the change to the
//! realtime [`EventPublisher`](teamboard_gateway::publisher::EventPublisher).

pub mod middleware;
pub mod notifications;
pub mod state;
pub mod todos;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// All authenticated REST routes, with the bearer check applied.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/todos", post(todos::create_todo))
        .route("/todos/{todo_id}", patch(todos::update_todo).delete(todos::delete_todo))
        .route("/teams/{team_id}/todos", get(todos::list_team_todos))
        .route("/notifications", get(notifications::list_notifications))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
