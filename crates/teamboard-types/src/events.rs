use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Notification, Todo, TodoTombstone};

/// Events sent FROM server TO client over the realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready", rename_all = "camelCase")]
    Ready {
        user_id: Uuid,
        email: String,
        name: String,
    },

    /// A todo was created in a team the client is viewing
    #[serde(rename = "todo.created")]
    TodoCreated(Todo),

    /// A todo changed in a team the client is viewing
    #[serde(rename = "todo.updated")]
    TodoUpdated(Todo),

    /// A todo was removed from a team the client is viewing
    #[serde(rename = "todo.deleted")]
    TodoDeleted(TodoTombstone),

    /// A personal notification for the connected user
    #[serde(rename = "notification.created")]
    NotificationCreated(Notification),

    /// Acknowledges a joinTeam to the joining connection only
    #[serde(rename = "team.joined", rename_all = "camelCase")]
    TeamJoined { team_id: Uuid },

    /// The join policy refused a joinTeam request
    #[serde(rename = "team.join_rejected", rename_all = "camelCase")]
    TeamJoinRejected { team_id: Uuid },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::TodoCreated(_) => "todo.created",
            Self::TodoUpdated(_) => "todo.updated",
            Self::TodoDeleted(_) => "todo.deleted",
            Self::NotificationCreated(_) => "notification.created",
            Self::TeamJoined { .. } => "team.joined",
            Self::TeamJoinRejected { .. } => "team.join_rejected",
        }
    }
}

/// Commands sent FROM client TO server over the realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate a socket that carried no credential on the upgrade request
    #[serde(rename = "identify")]
    Identify { token: String },

    /// Start receiving a team's todo changes
    #[serde(rename = "joinTeam", alias = "join_team")]
    JoinTeam {
        #[serde(rename = "teamId", alias = "team_id")]
        team_id: Uuid,
    },

    /// Stop receiving a team's todo changes
    #[serde(rename = "leaveTeam", alias = "leave_team")]
    LeaveTeam {
        #[serde(rename = "teamId", alias = "team_id")]
        team_id: Uuid,
    },
}
