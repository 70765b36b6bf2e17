use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Backlog,
    InProgress,
    Done,
    Blocked,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "backlog" => Some(Self::Backlog),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: Uuid,
    pub name: String,
}

/// A todo as it is materialized for clients: team and assignee are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TodoStatus,
    pub team: TeamSummary,
    pub assignee: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    pub fn assignee_id(&self) -> Option<Uuid> {
        self.assignee.as_ref().map(|a| a.id)
    }

    pub fn tombstone(&self) -> TodoTombstone {
        TodoTombstone {
            id: self.id,
            team_id: self.team.id,
        }
    }
}

/// What is left of a todo after deletion; enough for clients to drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoTombstone {
    pub id: Uuid,
    pub team_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationType {
    #[serde(rename = "todo.created")]
    TodoCreated,
    #[serde(rename = "todo.updated")]
    TodoUpdated,
    #[serde(rename = "todo.deleted")]
    TodoDeleted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TodoCreated => "todo.created",
            Self::TodoUpdated => "todo.updated",
            Self::TodoDeleted => "todo.deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo.created" => Some(Self::TodoCreated),
            "todo.updated" => Some(Self::TodoUpdated),
            "todo.deleted" => Some(Self::TodoDeleted),
            _ => None,
        }
    }
}

/// Durable per-user notification. Append-only for now; `read` is always
/// false on creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_type_field_with_namespaced_value() {
        let n = Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            team_id: None,
            kind: NotificationType::TodoDeleted,
            message: "Task \"x\" was deleted".into(),
            read: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "todo.deleted");
        assert_eq!(json["read"], false);
        assert!(json["teamId"].is_null());
        assert!(json.get("userId").is_some());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn status_strings_match_storage_values() {
        for status in [
            TodoStatus::Backlog,
            TodoStatus::InProgress,
            TodoStatus::Done,
            TodoStatus::Blocked,
        ] {
            assert_eq!(TodoStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
        }
        assert_eq!(TodoStatus::parse("archived"), None);
    }
}
