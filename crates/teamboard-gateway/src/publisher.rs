use tracing::info;

use teamboard_types::models::Notification;

use crate::error::PublishError;
use crate::notifications::{NewNotifications, NotificationStore};
use crate::rooms::{Room, RoomRouter};
use crate::rules::{PersonalNotice, TodoMutation};

/// Result of one publish: live deliveries made and notification rows saved.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub team_deliveries: usize,
    pub notifications: Vec<Notification>,
}

/// The single entry point for the mutation layer. Call it once per committed
/// mutation, after the transaction is durable.
#[derive(Clone)]
pub struct EventPublisher {
    router: RoomRouter,
    notifications: NotificationStore,
}

impl EventPublisher {
    pub fn new(router: RoomRouter, notifications: NotificationStore) -> Self {
        Self {
            router,
            notifications,
        }
    }

    /// Broadcast the team-scoped change, then persist and push each notice.
    ///
    /// Missed live deliveries are not errors. A failed notification write is,
    /// and stops the remaining notices.
    pub async fn publish(
        &self,
        mutation: &TodoMutation,
        notices: Vec<PersonalNotice>,
    ) -> Result<PublishReport, PublishError> {
        let team_id = mutation.team_id();
        let event = mutation.change_event();
        let event_name = event.name();

        let team_deliveries = self.router.broadcast(Room::Team(team_id), event).await;

        let mut report = PublishReport {
            team_deliveries,
            notifications: Vec::with_capacity(notices.len()),
        };

        for notice in notices {
            let saved = self
                .notifications
                .create_for_users(NewNotifications {
                    user_ids: vec![notice.user_id],
                    team_id: Some(team_id),
                    kind: notice.kind,
                    message: notice.message,
                })
                .await?;
            report.notifications.extend(saved);
        }

        info!(
            "{} for todo {} in team {}: {} live, {} notifications",
            event_name,
            mutation.todo().id,
            team_id,
            report.team_deliveries,
            report.notifications.len()
        );
        Ok(report)
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use teamboard_db::Database;
    use teamboard_types::events::ServerEvent;
    use teamboard_types::models::{NotificationType, TeamSummary, Todo, TodoStatus, UserSummary};

    use crate::error::NotificationError;
    use crate::notifications::tests::FlakyRepo;
    use crate::rooms::{ConnectionId, Outbound};
    use crate::rules::personal_notices;

    struct Fixture {
        db: Arc<Database>,
        router: RoomRouter,
        publisher: EventPublisher,
        actor: Uuid,
        b: Uuid,
        c: Uuid,
        team: TeamSummary,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let actor = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        db.create_user(actor, "actor@example.com", "Actor").unwrap();
        db.create_user(b, "b@example.com", "Bea").unwrap();
        db.create_user(c, "c@example.com", "Cam").unwrap();
        let team = TeamSummary {
            id: Uuid::new_v4(),
            name: "Ops".into(),
        };
        db.create_team(team.id, &team.name, actor).unwrap();

        let router = RoomRouter::new();
        let store = NotificationStore::new(db.clone(), router.clone());
        let publisher = EventPublisher::new(router.clone(), store);
        Fixture {
            db,
            router,
            publisher,
            actor,
            b,
            c,
            team,
        }
    }

    fn todo(team: &TeamSummary, assignee: Option<Uuid>) -> Todo {
        Todo {
            id: Uuid::new_v4(),
            title: "Rotate keys".into(),
            description: None,
            due_date: None,
            status: TodoStatus::InProgress,
            team: team.clone(),
            assignee: assignee.map(|id| UserSummary {
                id,
                email: String::new(),
                name: String::new(),
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn connect(router: &RoomRouter, rooms: &[Room]) -> mpsc::Receiver<Outbound> {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(16);
        router.attach(conn, tx).await;
        for room in rooms {
            router.join(conn, *room).await;
        }
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn create_broadcasts_to_team_then_notifies_assignee() {
        let f = fixture();
        let mut actor_rx = connect(&f.router, &[Room::User(f.actor), Room::Team(f.team.id)]).await;
        let mut b_rx = connect(&f.router, &[Room::User(f.b), Room::Team(f.team.id)]).await;

        let mutation = TodoMutation::Created(todo(&f.team, Some(f.b)));
        let report = f
            .publisher
            .publish(&mutation, personal_notices(f.actor, &mutation))
            .await
            .unwrap();

        assert_eq!(report.team_deliveries, 2);
        assert_eq!(report.notifications.len(), 1);
        assert_eq!(report.notifications[0].kind, NotificationType::TodoCreated);

        let actor_events = drain(&mut actor_rx);
        assert_eq!(actor_events.len(), 1);
        assert_eq!(actor_events[0].name(), "todo.created");

        // team event first, personal notification second
        let b_events: Vec<&str> = drain(&mut b_rx).iter().map(|e| e.name()).collect();
        assert_eq!(b_events, vec!["todo.created", "notification.created"]);

        assert_eq!(f.db.count_notifications_for_user(f.b).unwrap(), 1);
        assert_eq!(f.db.count_notifications_for_user(f.actor).unwrap(), 0);
    }

    #[tokio::test]
    async fn self_assigned_create_writes_nothing() {
        let f = fixture();
        let mutation = TodoMutation::Created(todo(&f.team, Some(f.actor)));
        let report = f
            .publisher
            .publish(&mutation, personal_notices(f.actor, &mutation))
            .await
            .unwrap();

        assert!(report.notifications.is_empty());
        assert_eq!(f.db.count_notifications_for_user(f.actor).unwrap(), 0);
    }

    #[tokio::test]
    async fn reassignment_writes_two_rows_for_new_assignee_and_none_for_old() {
        let f = fixture();
        let mutation = TodoMutation::Updated {
            todo: todo(&f.team, Some(f.c)),
            previous_assignee: Some(f.b),
        };
        f.publisher
            .publish(&mutation, personal_notices(f.actor, &mutation))
            .await
            .unwrap();

        let for_c = f.db.list_notifications_for_user(f.c, 50).unwrap();
        assert_eq!(for_c.len(), 2);
        assert!(for_c.iter().all(|n| n.kind == NotificationType::TodoUpdated));
        // newest first: the "assigned" notice was written last
        assert_eq!(for_c[0].message, "You were assigned task \"Rotate keys\"");
        assert_eq!(for_c[1].message, "Task \"Rotate keys\" was updated");
        assert_eq!(f.db.count_notifications_for_user(f.b).unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_sends_tombstone_and_deleted_notice() {
        let f = fixture();
        let mut watcher = connect(&f.router, &[Room::Team(f.team.id)]).await;
        let doomed = todo(&f.team, Some(f.b));
        let mutation = TodoMutation::Deleted(doomed.clone());

        f.publisher
            .publish(&mutation, personal_notices(f.actor, &mutation))
            .await
            .unwrap();

        let events = drain(&mut watcher);
        assert_eq!(events.len(), 1);
        match &*events[0] {
            ServerEvent::TodoDeleted(tomb) => {
                assert_eq!(tomb.id, doomed.id);
                assert_eq!(tomb.team_id, f.team.id);
            }
            other => panic!("unexpected {other:?}"),
        }

        let for_b = f.db.list_notifications_for_user(f.b, 50).unwrap();
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].kind, NotificationType::TodoDeleted);
        assert_eq!(for_b[0].team_id, Some(f.team.id));
    }

    #[tokio::test]
    async fn nobody_listening_is_not_an_error() {
        let f = fixture();
        let mutation = TodoMutation::Created(todo(&f.team, None));
        let report = f.publisher.publish(&mutation, Vec::new()).await.unwrap();
        assert_eq!(report.team_deliveries, 0);
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_after_team_broadcast() {
        let router = RoomRouter::new();
        let store = NotificationStore::new(Arc::new(FlakyRepo::failing()), router.clone());
        let publisher = EventPublisher::new(router.clone(), store);
        let team = TeamSummary {
            id: Uuid::new_v4(),
            name: "Ops".into(),
        };
        let assignee = Uuid::new_v4();
        let mut watcher = connect(&router, &[Room::Team(team.id), Room::User(assignee)]).await;

        let mutation = TodoMutation::Created(todo(&team, Some(assignee)));
        let err = publisher
            .publish(&mutation, personal_notices(Uuid::new_v4(), &mutation))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PublishError::Notification(NotificationError::Storage(_))
        ));
        // the committed change was still announced; the notification was not
        let names: Vec<&str> = drain(&mut watcher).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["todo.created"]);
    }
}
