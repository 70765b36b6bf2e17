use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use teamboard_db::Database;
use teamboard_types::api::Claims;
use teamboard_types::events::{ClientCommand, ServerEvent};

use crate::auth::TokenVerifier;
use crate::error::{AdmissionError, JoinError};
use crate::registry::{Session, SessionRegistry};
use crate::rooms::{ConnectionId, Outbound, Room, RoomRouter};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Answers "is this user on this team" for the strict join policy.
pub trait TeamDirectory: Send + Sync + 'static {
    fn is_member(&self, team_id: Uuid, user_id: Uuid) -> anyhow::Result<bool>;
}

impl TeamDirectory for Database {
    fn is_member(&self, team_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        Database::is_member(self, team_id, user_id)
    }
}

/// What happens when a connection asks to join a team room.
#[derive(Clone)]
pub enum JoinPolicy {
    /// Join whatever the client asks for. Membership was already checked when
    /// the client fetched its team list over REST.
    TrustClient,
    /// Re-check membership against the directory on every join.
    VerifyMembership(Arc<dyn TeamDirectory>),
}

impl fmt::Debug for JoinPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustClient => f.write_str("TrustClient"),
            Self::VerifyMembership(_) => f.write_str("VerifyMembership"),
        }
    }
}

/// An admitted connection, ready to be pumped by a transport.
pub struct Admission {
    pub session: Session,
    pub outbound: mpsc::Receiver<Outbound>,
}

/// Admission, room requests and teardown for realtime connections.
/// Knows nothing about sockets; see [`crate::connection`] for the transport.
#[derive(Clone)]
pub struct ConnectionManager {
    verifier: TokenVerifier,
    registry: SessionRegistry,
    policy: JoinPolicy,
    outbound_buffer: usize,
}

impl ConnectionManager {
    pub fn new(verifier: TokenVerifier, registry: SessionRegistry, policy: JoinPolicy) -> Self {
        Self {
            verifier,
            registry,
            policy,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }

    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }

    /// Verify a handshake credential. Nothing is registered on failure.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Claims, AdmissionError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AdmissionError::MissingToken)?;
        self.verifier.verify(token)
    }

    /// Register a verified connection under its user's personal room with
    /// `ready` already queued as its first frame.
    pub async fn admit(&self, claims: &Claims) -> Admission {
        let (session, outbound) = self
            .registry
            .admit(claims, self.outbound_buffer, |session| ServerEvent::Ready {
                user_id: session.user_id,
                email: session.email.clone(),
                name: session.name.clone(),
            })
            .await;

        info!("{} ({}) admitted as {}", session.email, session.user_id, session.id);
        Admission { session, outbound }
    }

    /// Authenticate and admit in one step.
    pub async fn connect(&self, token: Option<&str>) -> Result<Admission, AdmissionError> {
        let claims = self.authenticate(token).inspect_err(|e| {
            warn!("Realtime connection rejected: {}", e);
        })?;
        Ok(self.admit(&claims).await)
    }

    pub async fn handle_command(&self, conn: ConnectionId, cmd: ClientCommand) {
        let Some(session) = self.registry.get(conn).await else {
            // torn down while the command was in flight
            return;
        };

        match cmd {
            ClientCommand::Identify { .. } => {
                debug!("{} sent identify after admission, ignoring", conn);
            }

            ClientCommand::JoinTeam { team_id } => self.join_team(&session, team_id).await,

            ClientCommand::LeaveTeam { team_id } => {
                if self.router().leave(conn, Room::Team(team_id)).await {
                    debug!("{} ({}) left team {}", session.email, conn, team_id);
                }
            }
        }
    }

    async fn join_team(&self, session: &Session, team_id: Uuid) {
        if let Err(e) = self.may_join(session.user_id, team_id).await {
            warn!(
                "{} ({}) refused team {}: {}",
                session.email, session.user_id, team_id, e
            );
            self.router()
                .send_to(session.id, ServerEvent::TeamJoinRejected { team_id })
                .await;
            return;
        }

        let room = Room::Team(team_id);
        if !self.router().join(session.id, room).await
            && !self.router().rooms_of(session.id).await.contains(&room)
        {
            // queue closed and pruned by a broadcast; teardown is on its way
            debug!("{} ({}) gone before joining {}", session.email, session.id, room);
            return;
        }

        self.router()
            .send_to(session.id, ServerEvent::TeamJoined { team_id })
            .await;
        info!("{} ({}) joined team {}", session.email, session.user_id, team_id);
    }

    /// A failed lookup counts as a refusal.
    async fn may_join(&self, user_id: Uuid, team_id: Uuid) -> Result<(), JoinError> {
        let directory = match &self.policy {
            JoinPolicy::TrustClient => return Ok(()),
            JoinPolicy::VerifyMembership(directory) => directory.clone(),
        };

        let member =
            tokio::task::spawn_blocking(move || directory.is_member(team_id, user_id)).await??;
        if member {
            Ok(())
        } else {
            Err(JoinError::NotMember(team_id))
        }
    }

    /// Drop a connection from every room. Unconditional and idempotent.
    pub async fn disconnect(&self, conn: ConnectionId) {
        if let Some(session) = self.registry.remove(conn).await {
            info!("{} ({}) disconnected ({})", session.email, session.user_id, conn);
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn router(&self) -> &RoomRouter {
        self.registry.router()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        manager: ConnectionManager,
        verifier: TokenVerifier,
        user: Uuid,
        team: Uuid,
    }

    fn fixture(strict: bool) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = Uuid::new_v4();
        let team = Uuid::new_v4();
        db.create_user(user, "u@example.com", "U").unwrap();
        db.create_team(team, "Team", user).unwrap();

        let verifier = TokenVerifier::new("test-secret");
        let policy = if strict {
            JoinPolicy::VerifyMembership(db)
        } else {
            JoinPolicy::TrustClient
        };
        let manager = ConnectionManager::new(
            verifier.clone(),
            SessionRegistry::new(RoomRouter::new()),
            policy,
        )
        .with_outbound_buffer(16);

        Fixture {
            manager,
            verifier,
            user,
            team,
        }
    }

    fn token(f: &Fixture, user: Uuid) -> String {
        f.verifier
            .issue(user, "u@example.com", "U", chrono::Duration::hours(1))
            .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((*event).clone());
        }
        out
    }

    #[tokio::test]
    async fn valid_token_is_admitted_into_personal_room_with_ready_first() {
        let f = fixture(false);
        let mut admission = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();

        assert_eq!(admission.session.user_id, f.user);
        assert_eq!(
            f.manager.router().members(Room::User(f.user)).await,
            vec![admission.session.id]
        );
        let events = drain(&mut admission.outbound);
        assert!(matches!(events.as_slice(), [ServerEvent::Ready { user_id, .. }] if *user_id == f.user));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ready_stays_first_under_concurrent_personal_traffic() {
        let f = fixture(false);
        let router = f.manager.router().clone();
        let user = f.user;
        let token = token(&f, user);

        let noise = tokio::spawn(async move {
            loop {
                router
                    .notify_user(user, ServerEvent::TeamJoined { team_id: Uuid::nil() })
                    .await;
                tokio::task::yield_now().await;
            }
        });

        let mut overtaken = 0;
        for _ in 0..500 {
            let mut admission = f.manager.connect(Some(token.as_str())).await.unwrap();
            if !matches!(*admission.outbound.recv().await.unwrap(), ServerEvent::Ready { .. }) {
                overtaken += 1;
            }
            f.manager.disconnect(admission.session.id).await;
        }
        noise.abort();

        assert_eq!(overtaken, 0);
    }

    #[tokio::test]
    async fn bad_credentials_leave_no_state_behind() {
        let f = fixture(false);
        let expired = f
            .verifier
            .issue(f.user, "u@example.com", "U", chrono::Duration::hours(-3))
            .unwrap();
        let forged = TokenVerifier::new("other")
            .issue(f.user, "u@example.com", "U", chrono::Duration::hours(1))
            .unwrap();

        assert!(matches!(f.manager.connect(None).await, Err(AdmissionError::MissingToken)));
        assert!(matches!(f.manager.connect(Some("  ")).await, Err(AdmissionError::MissingToken)));
        assert!(matches!(f.manager.connect(Some("garbage")).await, Err(AdmissionError::InvalidToken(_))));
        assert!(matches!(f.manager.connect(Some(expired.as_str())).await, Err(AdmissionError::Expired)));
        assert!(matches!(f.manager.connect(Some(forged.as_str())).await, Err(AdmissionError::InvalidToken(_))));

        assert!(f.manager.registry().is_empty().await);
        assert_eq!(f.manager.router().connection_count().await, 0);
    }

    #[tokio::test]
    async fn join_team_acknowledges_only_the_joining_connection() {
        let f = fixture(false);
        let mut a = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        let mut b = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        drain(&mut a.outbound);
        drain(&mut b.outbound);

        f.manager
            .handle_command(a.session.id, ClientCommand::JoinTeam { team_id: f.team })
            .await;

        assert_eq!(drain(&mut a.outbound), vec![ServerEvent::TeamJoined { team_id: f.team }]);
        assert!(drain(&mut b.outbound).is_empty());
        assert_eq!(
            f.manager.router().members(Room::Team(f.team)).await,
            vec![a.session.id]
        );
    }

    #[tokio::test]
    async fn repeated_join_is_acknowledged_again() {
        let f = fixture(false);
        let mut a = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        drain(&mut a.outbound);

        for _ in 0..2 {
            f.manager
                .handle_command(a.session.id, ClientCommand::JoinTeam { team_id: f.team })
                .await;
        }

        assert_eq!(
            drain(&mut a.outbound),
            vec![
                ServerEvent::TeamJoined { team_id: f.team },
                ServerEvent::TeamJoined { team_id: f.team },
            ]
        );
        assert_eq!(f.manager.router().members(Room::Team(f.team)).await.len(), 1);
    }

    #[tokio::test]
    async fn pruned_connection_is_not_joined() {
        let f = fixture(false);
        let a = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        let conn = a.session.id;
        drop(a.outbound);

        // the closed queue is pruned by the next delivery attempt
        let delivered = f
            .manager
            .router()
            .notify_user(f.user, ServerEvent::TeamJoined { team_id: Uuid::nil() })
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(f.manager.router().connection_count().await, 0);

        f.manager
            .handle_command(conn, ClientCommand::JoinTeam { team_id: f.team })
            .await;

        assert!(f.manager.router().members(Room::Team(f.team)).await.is_empty());
        assert!(f.manager.router().rooms_of(conn).await.is_empty());
    }

    #[tokio::test]
    async fn trusting_policy_joins_any_team() {
        let f = fixture(false);
        let mut a = f.manager.connect(Some(token(&f, Uuid::new_v4()).as_str())).await.unwrap();
        drain(&mut a.outbound);
        let foreign = Uuid::new_v4();

        f.manager
            .handle_command(a.session.id, ClientCommand::JoinTeam { team_id: foreign })
            .await;

        assert_eq!(drain(&mut a.outbound), vec![ServerEvent::TeamJoined { team_id: foreign }]);
    }

    #[tokio::test]
    async fn verifying_policy_rejects_non_members() {
        let f = fixture(true);
        let mut member = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        let mut outsider = f.manager.connect(Some(token(&f, Uuid::new_v4()).as_str())).await.unwrap();
        drain(&mut member.outbound);
        drain(&mut outsider.outbound);

        f.manager
            .handle_command(member.session.id, ClientCommand::JoinTeam { team_id: f.team })
            .await;
        f.manager
            .handle_command(outsider.session.id, ClientCommand::JoinTeam { team_id: f.team })
            .await;

        assert_eq!(drain(&mut member.outbound), vec![ServerEvent::TeamJoined { team_id: f.team }]);
        assert_eq!(
            drain(&mut outsider.outbound),
            vec![ServerEvent::TeamJoinRejected { team_id: f.team }]
        );
        assert_eq!(
            f.manager.router().members(Room::Team(f.team)).await,
            vec![member.session.id]
        );
    }

    #[tokio::test]
    async fn leave_team_stops_team_events() {
        let f = fixture(false);
        let mut a = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        f.manager
            .handle_command(a.session.id, ClientCommand::JoinTeam { team_id: f.team })
            .await;
        f.manager
            .handle_command(a.session.id, ClientCommand::LeaveTeam { team_id: f.team })
            .await;
        drain(&mut a.outbound);

        let delivered = f
            .manager
            .router()
            .broadcast(Room::Team(f.team), ServerEvent::TeamJoined { team_id: f.team })
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn disconnect_removes_every_room_and_is_idempotent() {
        let f = fixture(false);
        let other_team = Uuid::new_v4();
        let a = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        let conn = a.session.id;
        for team_id in [f.team, other_team] {
            f.manager
                .handle_command(conn, ClientCommand::JoinTeam { team_id })
                .await;
        }
        assert_eq!(f.manager.router().rooms_of(conn).await.len(), 3);

        f.manager.disconnect(conn).await;
        f.manager.disconnect(conn).await;
        f.manager.disconnect(ConnectionId::new()).await;

        let router = f.manager.router();
        for room in [Room::Team(f.team), Room::Team(other_team), Room::User(f.user)] {
            assert!(router.members(room).await.is_empty());
            assert_eq!(
                router.broadcast(room, ServerEvent::TeamJoined { team_id: f.team }).await,
                0
            );
        }
        assert!(f.manager.registry().get(conn).await.is_none());
    }

    #[tokio::test]
    async fn commands_after_disconnect_are_ignored() {
        let f = fixture(false);
        let a = f.manager.connect(Some(token(&f, f.user).as_str())).await.unwrap();
        f.manager.disconnect(a.session.id).await;

        f.manager
            .handle_command(a.session.id, ClientCommand::JoinTeam { team_id: f.team })
            .await;
        assert!(f.manager.router().members(Room::Team(f.team)).await.is_empty());
    }
}
