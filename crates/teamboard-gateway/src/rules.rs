//! Who gets a personal notification for a committed todo mutation.
//!
//! The mutation layer evaluates these rules and hands the result to the
//! [`EventPublisher`](crate::publisher::EventPublisher); the publisher itself
//! never decides who is notified.

use uuid::Uuid;

use teamboard_types::events::ServerEvent;
use teamboard_types::models::{NotificationType, Todo};

/// A committed change to a todo, carrying the state the team should see.
#[derive(Debug, Clone)]
pub enum TodoMutation {
    Created(Todo),
    Updated {
        todo: Todo,
        /// Assignee before the update was applied.
        previous_assignee: Option<Uuid>,
    },
    /// The todo as it was just before deletion.
    Deleted(Todo),
}

impl TodoMutation {
    pub fn todo(&self) -> &Todo {
        match self {
            Self::Created(todo) | Self::Deleted(todo) => todo,
            Self::Updated { todo, .. } => todo,
        }
    }

    pub fn team_id(&self) -> Uuid {
        self.todo().team.id
    }

    pub fn kind(&self) -> NotificationType {
        match self {
            Self::Created(_) => NotificationType::TodoCreated,
            Self::Updated { .. } => NotificationType::TodoUpdated,
            Self::Deleted(_) => NotificationType::TodoDeleted,
        }
    }

    /// The team-scoped event: full todo, or a tombstone for deletion.
    pub fn change_event(&self) -> ServerEvent {
        match self {
            Self::Created(todo) => ServerEvent::TodoCreated(todo.clone()),
            Self::Updated { todo, .. } => ServerEvent::TodoUpdated(todo.clone()),
            Self::Deleted(todo) => ServerEvent::TodoDeleted(todo.tombstone()),
        }
    }
}

/// One personal notification to persist and push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalNotice {
    pub user_id: Uuid,
    pub kind: NotificationType,
    pub message: String,
}

pub fn assigned_message(title: &str) -> String {
    format!("You were assigned task \"{title}\"")
}

pub fn updated_message(title: &str) -> String {
    format!("Task \"{title}\" was updated")
}

pub fn deleted_message(title: &str) -> String {
    format!("Task \"{title}\" was deleted")
}

/// Notices for `mutation` performed by `actor`, in delivery order.
///
/// The actor is exempt from every notice, including the "you were assigned"
/// one when they assign the todo to themselves.
pub fn personal_notices(actor: Uuid, mutation: &TodoMutation) -> Vec<PersonalNotice> {
    let todo = mutation.todo();
    let Some(assignee) = todo.assignee_id().filter(|a| *a != actor) else {
        return Vec::new();
    };

    match mutation {
        TodoMutation::Created(_) => vec![PersonalNotice {
            user_id: assignee,
            kind: NotificationType::TodoCreated,
            message: assigned_message(&todo.title),
        }],
        TodoMutation::Updated { previous_assignee, .. } => {
            let mut notices = vec![PersonalNotice {
                user_id: assignee,
                kind: NotificationType::TodoUpdated,
                message: updated_message(&todo.title),
            }];
            if *previous_assignee != Some(assignee) {
                notices.push(PersonalNotice {
                    user_id: assignee,
                    kind: NotificationType::TodoUpdated,
                    message: assigned_message(&todo.title),
                });
            }
            notices
        }
        TodoMutation::Deleted(_) => vec![PersonalNotice {
            user_id: assignee,
            kind: NotificationType::TodoDeleted,
            message: deleted_message(&todo.title),
        }],
    }
}
