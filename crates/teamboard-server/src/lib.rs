pub mod config;
pub mod realtime;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use teamboard_api::state::{AppState, AppStateInner};
use teamboard_db::Database;
use teamboard_gateway::auth::TokenVerifier;
use teamboard_gateway::lifecycle::{ConnectionManager, JoinPolicy};
use teamboard_gateway::notifications::NotificationStore;
use teamboard_gateway::publisher::EventPublisher;
use teamboard_gateway::registry::SessionRegistry;
use teamboard_gateway::rooms::RoomRouter;

use crate::config::{Config, JoinPolicyKind};
use crate::realtime::{RealtimeState, ws_upgrade};

/// Wire one router instance through every component and assemble the routes.
///
/// The returned manager shares state with the served routes.
pub fn build_app(config: &Config, db: Arc<Database>) -> (Router, ConnectionManager) {
    let router = RoomRouter::new();
    let verifier = TokenVerifier::new(&config.jwt_secret);

    let store = NotificationStore::new(db.clone(), router.clone());
    let publisher = EventPublisher::new(router.clone(), store);

    let policy = match config.join_policy {
        JoinPolicyKind::Trust => JoinPolicy::TrustClient,
        JoinPolicyKind::Verify => JoinPolicy::VerifyMembership(db.clone()),
    };
    let manager = ConnectionManager::new(verifier.clone(), SessionRegistry::new(router), policy)
        .with_outbound_buffer(config.outbound_buffer);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        verifier,
        publisher,
    });

    let ws_route = Router::new()
        .route("/realtime", get(ws_upgrade))
        .with_state(RealtimeState {
            manager: manager.clone(),
            identify_timeout: config.identify_timeout,
        });

    let app = Router::new()
        .merge(teamboard_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    (app, manager)
}
