//! Database row types. These map directly to SQLite rows and are converted
//! into the shared teamboard-types models at the edge of this crate.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use teamboard_types::models::{
    Notification, NotificationType, TeamSummary, Todo, TodoStatus, UserSummary,
};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

/// A todo joined with its team name and (optional) assignee.
pub struct TodoRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub status: String,
    pub team_id: String,
    pub team_name: String,
    pub assignee_id: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub kind: String,
    pub message: String,
    pub read: bool,
    pub created_at: String,
    pub user_id: String,
    pub team_id: Option<String>,
}

/// Fixed-width RFC 3339, so lexical order in SQL equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{raw}'"))?
        .with_timezone(&Utc))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{raw}'"))
}

impl UserRow {
    pub fn into_summary(self) -> Result<UserSummary> {
        Ok(UserSummary {
            id: parse_id(&self.id)?,
            email: self.email,
            name: self.name,
        })
    }
}

impl TryFrom<TodoRow> for Todo {
    type Error = anyhow::Error;

    fn try_from(row: TodoRow) -> Result<Self> {
        let assignee = match row.assignee_id {
            Some(id) => Some(UserSummary {
                id: parse_id(&id)?,
                email: row.assignee_email.unwrap_or_default(),
                name: row.assignee_name.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(Todo {
            id: parse_id(&row.id)?,
            title: row.title,
            description: row.description,
            due_date: row.due_date.as_deref().map(parse_timestamp).transpose()?,
            status: TodoStatus::parse(&row.status)
                .with_context(|| format!("corrupt status '{}' on todo '{}'", row.status, row.id))?,
            team: TeamSummary {
                id: parse_id(&row.team_id)?,
                name: row.team_name,
            },
            assignee,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            team_id: row.team_id.as_deref().map(parse_id).transpose()?,
            kind: NotificationType::parse(&row.kind)
                .with_context(|| format!("corrupt notification type '{}'", row.kind))?,
            message: row.message,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}
