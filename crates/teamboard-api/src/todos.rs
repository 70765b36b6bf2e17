use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use teamboard_db::queries::TodoFields;
use teamboard_gateway::rules::{TodoMutation, personal_notices};
use teamboard_types::api::{Claims, CreateTodoRequest, DeleteTodoResponse, UpdateTodoRequest};

use crate::state::{AppState, internal};

const MAX_TITLE_LEN: usize = 200;

fn clean_title(raw: &str) -> Result<String, StatusCode> {
    let title = raw.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(title.to_string())
}

/// Hand a committed change to the realtime layer.
///
/// Live fan-out never fails the request; a lost notification row does.
async fn publish(state: &AppState, actor: Uuid, mutation: TodoMutation) -> Result<(), StatusCode> {
    let notices = personal_notices(actor, &mutation);
    state.publisher.publish(&mutation, notices).await.map_err(|e| {
        error!(
            "todo {} committed but notification failed: {}",
            mutation.todo().id,
            e
        );
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(())
}

pub async fn create_todo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTodoRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let actor = claims.sub;
    let team_id = req.team_id;
    let fields = TodoFields {
        title: clean_title(&req.title)?,
        description: req.description,
        due_date: req.due_date,
        status: req.status.unwrap_or_default(),
        assignee_id: req.assignee_id,
    };

    let todo = state
        .blocking(move |db| {
            if !db.is_member(team_id, actor).map_err(internal)? {
                return Err(StatusCode::FORBIDDEN);
            }
            if let Some(assignee) = fields.assignee_id {
                if !db.is_member(team_id, assignee).map_err(internal)? {
                    warn!("{} tried to assign {} outside team {}", actor, assignee, team_id);
                    return Err(StatusCode::BAD_REQUEST);
                }
            }
            db.insert_todo(Uuid::new_v4(), team_id, &fields).map_err(internal)
        })
        .await?;

    publish(&state, actor, TodoMutation::Created(todo.clone())).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn update_todo(
    State(state): State<AppState>,
    Path(todo_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateTodoRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let actor = claims.sub;
    let title = req.title.as_deref().map(clean_title).transpose()?;

    let (todo, previous_assignee) = state
        .blocking(move |db| {
            let current = db
                .get_todo(todo_id)
                .map_err(internal)?
                .ok_or(StatusCode::NOT_FOUND)?;
            let team_id = current.team.id;
            if !db.is_member(team_id, actor).map_err(internal)? {
                return Err(StatusCode::FORBIDDEN);
            }

            let previous_assignee = current.assignee_id();
            let assignee_id = req.assignee_id.unwrap_or(previous_assignee);
            if let Some(assignee) = assignee_id.filter(|a| Some(*a) != previous_assignee) {
                if !db.is_member(team_id, assignee).map_err(internal)? {
                    return Err(StatusCode::BAD_REQUEST);
                }
            }

            let fields = TodoFields {
                title: title.unwrap_or(current.title),
                description: req.description.or(current.description),
                due_date: req.due_date.unwrap_or(current.due_date),
                status: req.status.unwrap_or(current.status),
                assignee_id,
            };
            let updated = db
                .update_todo(todo_id, &fields)
                .map_err(internal)?
                .ok_or(StatusCode::NOT_FOUND)?;
            Ok((updated, previous_assignee))
        })
        .await?;

    publish(
        &state,
        actor,
        TodoMutation::Updated {
            todo: todo.clone(),
            previous_assignee,
        },
    )
    .await?;
    Ok(Json(todo))
}

pub async fn delete_todo(
    State(state): State<AppState>,
    Path(todo_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let actor = claims.sub;

    let doomed = state
        .blocking(move |db| {
            let doomed = db
                .get_todo(todo_id)
                .map_err(internal)?
                .ok_or(StatusCode::NOT_FOUND)?;
            if !db.is_member(doomed.team.id, actor).map_err(internal)? {
                return Err(StatusCode::FORBIDDEN);
            }
            if !db.delete_todo(todo_id).map_err(internal)? {
                return Err(StatusCode::NOT_FOUND);
            }
            Ok(doomed)
        })
        .await?;

    publish(&state, actor, TodoMutation::Deleted(doomed)).await?;
    Ok(Json(DeleteTodoResponse { deleted: true }))
}

/// Full refetch of a team's board, used by clients to reconcile after a gap.
pub async fn list_team_todos(
    State(state): State<AppState>,
    Path(team_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let actor = claims.sub;
    let todos = state
        .blocking(move |db| {
            if !db.is_member(team_id, actor).map_err(internal)? {
                return Err(StatusCode::FORBIDDEN);
            }
            db.list_todos_for_team(team_id).map_err(internal)
        })
        .await?;

    Ok(Json(todos))
}
