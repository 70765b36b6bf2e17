use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use teamboard_types::api::Claims;
use teamboard_types::events::ServerEvent;

use crate::rooms::{ConnectionId, Outbound, Room, RoomRouter};

/// An admitted connection and who it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnectionId,
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub connected_at: DateTime<Utc>,
}

/// Tracks which live connection belongs to which authenticated user.
///
/// Only admitted connections ever appear here; room membership itself lives
/// in the [`RoomRouter`], which this registry keeps in step.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ConnectionId, Session>>>,
    router: RoomRouter,
}

impl SessionRegistry {
    pub fn new(router: RoomRouter) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            router,
        }
    }

    /// Register a verified connection and put it in its owner's personal room.
    /// Returns the session and the receiving end of its outbound queue.
    ///
    /// `first` is queued before the connection becomes reachable by any room,
    /// so nothing broadcast concurrently can overtake it.
    pub async fn admit(
        &self,
        claims: &Claims,
        outbound_buffer: usize,
        first: impl FnOnce(&Session) -> ServerEvent,
    ) -> (Session, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(outbound_buffer.max(1));

        let session = Session {
            id,
            user_id: claims.sub,
            email: claims.email.clone(),
            name: claims.name.clone(),
            connected_at: Utc::now(),
        };

        if tx.try_send(Arc::new(first(&session))).is_err() {
            warn!("could not queue first event for {}", id);
        }

        self.router.attach(id, tx).await;
        self.router.join(id, Room::User(claims.sub)).await;
        self.sessions.write().await.insert(id, session.clone());

        (session, rx)
    }

    /// Forget a connection and pull it out of every room. Idempotent.
    pub async fn remove(&self, id: ConnectionId) -> Option<Session> {
        // Stop deliveries before the session disappears.
        self.router.leave_all(id).await;
        self.sessions.write().await.remove(&id)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn connections_for_user(&self, user_id: Uuid) -> Vec<ConnectionId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }
}
