//! Error types for shopflow.

use thiserror::Error;

use crate::model::{DepartmentId, EntryKey, FileId, NotificationId, ProjectId, UserId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("queue entry already exists for file {file} in department {department}")]
    DuplicateQueueEntry {
        file: FileId,
        department: DepartmentId,
    },

    #[error("queue entry not found: {0}")]
    EntryNotFound(EntryKey),

    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("department not found: {0}")]
    DepartmentNotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("notification not found: {0}")]
    NotificationNotFound(NotificationId),

    /// Lifecycle flags changed on an entry whose department has no permission yet.
    #[error("department has no permission to work on this file: {0}")]
    NotPermitted(EntryKey),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors caused by the request itself rather than by the system.
    /// Nothing was written when one of these is returned.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::DuplicateQueueEntry { .. }
                | Error::EntryNotFound(_)
                | Error::FileNotFound(_)
                | Error::DepartmentNotFound(_)
                | Error::ProjectNotFound(_)
                | Error::UserNotFound(_)
                | Error::NotificationNotFound(_)
                | Error::NotPermitted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
