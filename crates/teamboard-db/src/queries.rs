use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use teamboard_types::models::{Notification, Todo, TodoStatus, UserSummary};

use crate::Database;
use crate::models::{NotificationRow, TodoRow, UserRow, format_timestamp};

/// Column values for a todo insert or full-row update.
#[derive(Debug, Clone)]
pub struct TodoFields {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TodoStatus,
    pub assignee_id: Option<Uuid>,
}

const TODO_SELECT: &str = "
    SELECT t.id, t.title, t.description, t.due_date, t.status,
           t.team_id, tm.name, t.assignee_id, u.email, u.name,
           t.created_at, t.updated_at
    FROM todos t
    JOIN teams tm ON tm.id = t.team_id
    LEFT JOIN users u ON u.id = t.assignee_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, email: &str, name: &str) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), email, name, now),
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserSummary>> {
        let row = self.with_conn(|conn| query_user(conn, &id.to_string()))?;
        row.map(UserRow::into_summary).transpose()
    }

    // -- Teams --

    /// Create a team and make its owner the first member.
    pub fn create_team(&self, id: Uuid, name: &str, owner_id: Uuid) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO teams (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), name, owner_id.to_string(), &now),
            )?;
            tx.execute(
                "INSERT INTO team_memberships (id, team_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, 'owner', ?4)",
                (Uuid::new_v4().to_string(), id.to_string(), owner_id.to_string(), &now),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Add a member. Adding an existing member is a no-op.
    pub fn add_member(&self, team_id: Uuid, user_id: Uuid) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO team_memberships (id, team_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, 'member', ?4)",
                (Uuid::new_v4().to_string(), team_id.to_string(), user_id.to_string(), now),
            )?;
            Ok(())
        })
    }

    pub fn is_member(&self, team_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM team_memberships WHERE team_id = ?1 AND user_id = ?2",
                    (team_id.to_string(), user_id.to_string()),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Todos --

    pub fn insert_todo(&self, id: Uuid, team_id: Uuid, fields: &TodoFields) -> Result<Todo> {
        let now = format_timestamp(&Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO todos
                    (id, title, description, due_date, status, team_id, assignee_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                rusqlite::params![
                    id.to_string(),
                    fields.title,
                    fields.description,
                    fields.due_date.as_ref().map(format_timestamp),
                    fields.status.as_str(),
                    team_id.to_string(),
                    fields.assignee_id.map(|a| a.to_string()),
                    now,
                ],
            )?;
            query_todo(conn, &id.to_string())?
                .ok_or_else(|| anyhow::anyhow!("todo {} vanished after insert", id))
        })
    }

    pub fn get_todo(&self, id: Uuid) -> Result<Option<Todo>> {
        self.with_conn(|conn| query_todo(conn, &id.to_string()))
    }

    /// Overwrite every mutable column and bump `updated_at`.
    /// Returns `None` if the todo no longer exists.
    pub fn update_todo(&self, id: Uuid, fields: &TodoFields) -> Result<Option<Todo>> {
        let now = format_timestamp(&Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE todos
                 SET title = ?2, description = ?3, due_date = ?4, status = ?5,
                     assignee_id = ?6, updated_at = ?7
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    fields.title,
                    fields.description,
                    fields.due_date.as_ref().map(format_timestamp),
                    fields.status.as_str(),
                    fields.assignee_id.map(|a| a.to_string()),
                    now,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_todo(conn, &id.to_string())
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_todo(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM todos WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })
    }

    pub fn list_todos_for_team(&self, team_id: Uuid) -> Result<Vec<Todo>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{TODO_SELECT}
                 WHERE t.team_id = ?1
                 ORDER BY t.due_date IS NULL, t.due_date ASC, t.created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([team_id.to_string()], map_todo_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Todo::try_from).collect()
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, type, message, read, created_at, user_id, team_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    notification.id.to_string(),
                    notification.kind.as_str(),
                    notification.message,
                    notification.read,
                    format_timestamp(&notification.created_at),
                    notification.user_id.to_string(),
                    notification.team_id.map(|t| t.to_string()),
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first, at most `limit` rows.
    pub fn list_notifications_for_user(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, type, message, read, created_at, user_id, team_id
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id.to_string(), limit], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        message: row.get(2)?,
                        read: row.get(3)?,
                        created_at: row.get(4)?,
                        user_id: row.get(5)?,
                        team_id: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Notification::try_from).collect()
        })
    }

    pub fn count_notifications_for_user(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, email, name, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_todo(conn: &Connection, id: &str) -> Result<Option<Todo>> {
    let sql = format!("{TODO_SELECT} WHERE t.id = ?1");
    let row = conn.query_row(&sql, [id], map_todo_row).optional()?;
    row.map(Todo::try_from).transpose()
}

fn map_todo_row(row: &Row<'_>) -> rusqlite::Result<TodoRow> {
    Ok(TodoRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        due_date: row.get(3)?,
        status: row.get(4)?,
        team_id: row.get(5)?,
        team_name: row.get(6)?,
        assignee_id: row.get(7)?,
        assignee_email: row.get(8)?,
        assignee_name: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}
