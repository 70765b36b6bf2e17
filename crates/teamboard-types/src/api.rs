use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::TodoStatus;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the realtime handshake.
/// Both sides verify with the same secret, so the shape lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub name: String,
    pub exp: usize,
}

// -- Todos --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateTodoRequest {
    pub team_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TodoStatus>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
}

/// Partial update. For `assignee_id` and `due_date` an absent field leaves the
/// value alone while an explicit `null` clears it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TodoStatus>,
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub assignee_id: Option<Option<Uuid>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
pub struct DeleteTodoResponse {
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_distinguishes_absent_from_null_assignee() {
        let absent: UpdateTodoRequest = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(absent.assignee_id, None);

        let cleared: UpdateTodoRequest = serde_json::from_str(r#"{"assigneeId":null}"#).unwrap();
        assert_eq!(cleared.assignee_id, Some(None));

        let id = Uuid::new_v4();
        let set: UpdateTodoRequest =
            serde_json::from_str(&format!(r#"{{"assigneeId":"{id}"}}"#)).unwrap();
        assert_eq!(set.assignee_id, Some(Some(id)));
    }
}
