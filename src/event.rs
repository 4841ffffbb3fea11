//! Structured events published to per-user topics after every queue mutation.
//!
//! State in the store is the source of truth. Events only tell open views
//! that something changed; losing one is harmless, receiving one twice is
//! handled by the consumer's dedup on `message_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    DepartmentId, FileId, MessageId, Notification, ProjectId, ProjectStatus, UserId,
};
use crate::view::FileView;

/// A per-user channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    /// Task notices for one user.
    Tasks(UserId),
    /// Project notices for one user.
    Projects(UserId),
    /// Refresh signal for a user's open department view.
    DepartmentView(UserId),
    /// Refresh signal for a user's open project view.
    ProjectView(UserId),
}

impl Topic {
    /// Every topic a user's connections may subscribe to.
    pub fn all_for(user: UserId) -> [Topic; 4] {
        [
            Topic::Tasks(user),
            Topic::Projects(user),
            Topic::DepartmentView(user),
            Topic::ProjectView(user),
        ]
    }

    pub fn user(&self) -> UserId {
        match *self {
            Topic::Tasks(u) | Topic::Projects(u) | Topic::DepartmentView(u) | Topic::ProjectView(u) => u,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Topic::Tasks(_) => "tasks",
            Topic::Projects(_) => "projects",
            Topic::DepartmentView(_) => "dept_view",
            Topic::ProjectView(_) => "project_view",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind(), self.user().0)
    }
}

impl std::str::FromStr for Topic {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || crate::error::Error::Other(format!("bad topic: {s}"));
        let (kind, user) = s.split_once('.').ok_or_else(bad)?;
        let user: UserId = user.parse().map_err(|_| bad())?;
        match kind {
            "tasks" => Ok(Topic::Tasks(user)),
            "projects" => Ok(Topic::Projects(user)),
            "dept_view" => Ok(Topic::DepartmentView(user)),
            "project_view" => Ok(Topic::ProjectView(user)),
            _ => Err(bad()),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = crate::error::Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

/// A published message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per logical message. Redeliveries carry the same id.
    pub message_id: MessageId,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub event: EventKind,
}

impl Envelope {
    pub fn new(topic: Topic, event: EventKind) -> Self {
        Self {
            message_id: MessageId::new(),
            topic,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A task was created; the notification was persisted for the recipient.
    TaskCreated { notification: Notification },
    /// Fresh project figures.
    ProjectProgress {
        project_id: ProjectId,
        progress: u8,
        status: ProjectStatus,
    },
    /// Fresh projection of a mutated file.
    FileChanged { file: Box<FileView> },
    /// A department was taken out of a file's chain.
    TaskRemoved {
        file_id: FileId,
        department_id: DepartmentId,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TaskCreated { .. } => "task_created",
            EventKind::ProjectProgress { .. } => "project_progress",
            EventKind::FileChanged { .. } => "file_changed",
            EventKind::TaskRemoved { .. } => "task_removed",
        }
    }
}
