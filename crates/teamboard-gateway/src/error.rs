use thiserror::Error;
use uuid::Uuid;

/// Why a socket was refused at the door. Nothing is registered for it.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("missing auth token")]
    MissingToken,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("auth token expired")]
    Expired,

    #[error("invalid auth token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("no identify frame within {0} seconds")]
    IdentifyTimeout(u64),
}

/// Why a connection was kept out of a team room under the strict policy.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("not a member of team {0}")]
    NotMember(Uuid),

    #[error("membership lookup failed: {0:#}")]
    Directory(#[from] anyhow::Error),

    #[error("membership worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Notification writes are the one part of fan-out the caller must hear about.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error("storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("notification persistence failed: {0}")]
    Notification(#[from] NotificationError),
}
