use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};
use uuid::Uuid;

use teamboard_types::events::ServerEvent;

/// What a connection's outbound queue carries. One allocation per broadcast,
/// shared by every recipient.
pub type Outbound = Arc<ServerEvent>;

/// Identifies one live socket. A user with two tabs open has two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named multicast group. Team rooms are joined on request, the user room
/// is joined implicitly at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Team(Uuid),
    User(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Team(id) => write!(f, "team:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// In-memory index of live connections and the rooms they have joined.
///
/// Holds no durable state: after a restart it starts empty and is rebuilt as
/// clients reconnect and rejoin. Cloning shares the same index.
#[derive(Clone, Default)]
pub struct RoomRouter {
    inner: Arc<RwLock<RouterState>>,
}

#[derive(Default)]
struct RouterState {
    /// room -> members
    rooms: HashMap<Room, HashSet<ConnectionId>>,

    /// connection -> outbound queue and the rooms it is in
    outlets: HashMap<ConnectionId, Outlet>,
}

struct Outlet {
    tx: mpsc::Sender<Outbound>,
    rooms: HashSet<Room>,
}

impl RouterState {
    fn detach(&mut self, conn: ConnectionId) -> Vec<Room> {
        let Some(outlet) = self.outlets.remove(&conn) else {
            return Vec::new();
        };

        for room in &outlet.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&conn);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }

        outlet.rooms.into_iter().collect()
    }
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue. It is in no room yet.
    pub async fn attach(&self, conn: ConnectionId, tx: mpsc::Sender<Outbound>) {
        self.inner.write().await.outlets.insert(
            conn,
            Outlet {
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Add a connection to a room. Returns `true` only if it was not already
    /// a member. Unknown (or already torn down) connections are ignored.
    pub async fn join(&self, conn: ConnectionId, room: Room) -> bool {
        let mut state = self.inner.write().await;

        let Some(outlet) = state.outlets.get_mut(&conn) else {
            return false;
        };
        if !outlet.rooms.insert(room) {
            return false;
        }

        state.rooms.entry(room).or_default().insert(conn);
        debug!("{} joined {}", conn, room);
        true
    }

    /// Remove a connection from one room. Returns `true` if it was a member.
    pub async fn leave(&self, conn: ConnectionId, room: Room) -> bool {
        let mut state = self.inner.write().await;

        let was_member = state
            .outlets
            .get_mut(&conn)
            .is_some_and(|outlet| outlet.rooms.remove(&room));

        if let Some(members) = state.rooms.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                state.rooms.remove(&room);
            }
        }

        was_member
    }

    /// Remove a connection from every room and drop its outbound queue.
    /// Safe to call repeatedly, and for connections that were never attached.
    pub async fn leave_all(&self, conn: ConnectionId) -> Vec<Room> {
        self.inner.write().await.detach(conn)
    }

    /// Deliver an event to every member of `room`. Returns how many queues
    /// accepted it.
    ///
    /// Never waits on a recipient: a full queue loses this event, a closed
    /// queue gets its connection pruned. Empty and unknown rooms are fine.
    pub async fn broadcast(&self, room: Room, event: ServerEvent) -> usize {
        let event: Outbound = Arc::new(event);
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let state = self.inner.read().await;
            let Some(members) = state.rooms.get(&room) else {
                trace!("{} to {}: no members", event.name(), room);
                return 0;
            };

            for conn in members {
                let Some(outlet) = state.outlets.get(conn) else {
                    continue;
                };
                match outlet.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        trace!("{} outbound queue full, dropping {}", conn, event.name());
                    }
                    Err(TrySendError::Closed(_)) => dead.push(*conn),
                }
            }
        }

        if !dead.is_empty() {
            let mut state = self.inner.write().await;
            for conn in dead {
                trace!("pruning closed connection {}", conn);
                state.detach(conn);
            }
        }

        debug!("{} to {}: {} deliveries", event.name(), room, delivered);
        delivered
    }

    /// Deliver to a user's personal room, i.e. all of their connections.
    pub async fn notify_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.broadcast(Room::User(user_id), event).await
    }

    /// Deliver to one connection only, regardless of rooms.
    pub async fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let state = self.inner.read().await;
        state
            .outlets
            .get(&conn)
            .is_some_and(|outlet| outlet.tx.try_send(Arc::new(event)).is_ok())
    }

    pub async fn members(&self, room: Room) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn rooms_of(&self, conn: ConnectionId) -> Vec<Room> {
        self.inner
            .read()
            .await
            .outlets
            .get(&conn)
            .map(|outlet| outlet.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.outlets.len()
    }
}
