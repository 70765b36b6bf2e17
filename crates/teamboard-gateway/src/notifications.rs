use std::sync::Arc;

use anyhow::Context;
use chrono::{SubsecRound, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use teamboard_db::{Database, NOTIFICATION_HISTORY_LIMIT};
use teamboard_types::events::ServerEvent;
use teamboard_types::models::{Notification, NotificationType};

use crate::error::NotificationError;
use crate::rooms::RoomRouter;

/// Durable storage for notifications. Implementations block; the store calls
/// them from a blocking worker.
pub trait NotificationRepository: Send + Sync + 'static {
    fn insert(&self, notification: &Notification) -> anyhow::Result<()>;

    /// Newest first, at most `limit`.
    fn list_for_user(&self, user_id: Uuid, limit: u32) -> anyhow::Result<Vec<Notification>>;
}

impl NotificationRepository for Database {
    fn insert(&self, notification: &Notification) -> anyhow::Result<()> {
        self.insert_notification(notification)
    }

    fn list_for_user(&self, user_id: Uuid, limit: u32) -> anyhow::Result<Vec<Notification>> {
        self.list_notifications_for_user(user_id, limit)
    }
}

/// One notification fanned out to several users.
#[derive(Debug, Clone)]
pub struct NewNotifications {
    pub user_ids: Vec<Uuid>,
    pub team_id: Option<Uuid>,
    pub kind: NotificationType,
    pub message: String,
}

/// Persists notifications and pushes them to their owners' personal rooms.
#[derive(Clone)]
pub struct NotificationStore {
    repo: Arc<dyn NotificationRepository>,
    router: RoomRouter,
}

impl NotificationStore {
    pub fn new(repo: Arc<dyn NotificationRepository>, router: RoomRouter) -> Self {
        Self { repo, router }
    }

    /// Write one unread row per user, then push each saved row live.
    ///
    /// Rows are written one by one. The first storage fault stops the call and
    /// is returned; rows written before it stay written but are not pushed.
    /// Live delivery never fails the call.
    pub async fn create_for_users(
        &self,
        request: NewNotifications,
    ) -> Result<Vec<Notification>, NotificationError> {
        let NewNotifications {
            user_ids,
            team_id,
            kind,
            message,
        } = request;

        let rows: Vec<Notification> = user_ids
            .into_iter()
            .map(|user_id| Notification {
                id: Uuid::new_v4(),
                user_id,
                team_id,
                kind,
                message: message.clone(),
                read: false,
                // storage keeps microseconds; the pushed copy must match it
                created_at: Utc::now().trunc_subsecs(6),
            })
            .collect();

        let repo = self.repo.clone();
        let saved = tokio::task::spawn_blocking(move || {
            for row in &rows {
                repo.insert(row)
                    .with_context(|| format!("saving {} notification for {}", row.kind.as_str(), row.user_id))?;
            }
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
        .map_err(|e| {
            error!("Notification write failed: {:#}", e);
            NotificationError::Storage(e)
        })?;

        for notification in &saved {
            let delivered = self
                .router
                .notify_user(notification.user_id, ServerEvent::NotificationCreated(notification.clone()))
                .await;
            debug!(
                "notification {} for {} pushed to {} connections",
                notification.id, notification.user_id, delivered
            );
        }

        Ok(saved)
    }

    /// The user's most recent notifications, newest first. No side effects.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>, NotificationError> {
        let repo = self.repo.clone();
        let list = tokio::task::spawn_blocking(move || {
            repo.list_for_user(user_id, NOTIFICATION_HISTORY_LIMIT)
        })
        .await??;
        Ok(list)
    }
}
