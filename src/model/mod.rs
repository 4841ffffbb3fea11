//! Core data model.
//!
//! Projects own files. Each file is routed through an ordered chain of
//! departments; one queue entry per (file, department) records whether that
//! department may work on the file and how far it got.

pub mod entry;
pub mod project;

pub use entry::*;
pub use project::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Project identifier.
    ProjectId
);
id_type!(
    /// File identifier.
    FileId
);
id_type!(
    /// Department identifier.
    DepartmentId
);
id_type!(
    /// User identifier.
    UserId
);
id_type!(
    /// Queue entry identifier. The composite [`EntryKey`] is the natural key.
    EntryId
);
id_type!(NotificationId);
id_type!(CommentId);
id_type!(
    /// Identifier carried by every published message; consumers dedup on it.
    MessageId
);

// ---------------------------------------------------------------------------
// Department
// ---------------------------------------------------------------------------

/// A department of the shop. `order` fixes its position in every file's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub name: String,
    pub order: i32,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Where a file is routed once it leaves the shop floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destiny {
    Production,
    Secretariat,
}

impl std::fmt::Display for Destiny {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Destiny::Production => "production",
            Destiny::Secretariat => "secretariat",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Destiny {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "production" => Ok(Destiny::Production),
            "secretariat" => Ok(Destiny::Secretariat),
            other => Err(crate::error::Error::Other(format!("unknown destiny: {other}"))),
        }
    }
}

/// A project file travelling through the department chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub project_id: ProjectId,
    pub name: String,
    pub destiny: Destiny,
    /// True until the first queue entry is created ("unseen" badge).
    pub new: bool,
}

/// A comment left on a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub file_id: FileId,
    pub user: UserId,
    pub text: String,
    pub posted_at: DateTime<Utc>,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserStatus {
    Busy,
    Free,
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserStatus::Busy => "Busy",
            UserStatus::Free => "Free",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for UserStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Busy" => Ok(UserStatus::Busy),
            "Free" => Ok(UserStatus::Free),
            other => Err(crate::error::Error::Other(format!("unknown user status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Administrators manage queues; the API layer gates on this.
    pub is_staff: bool,
    pub status: UserStatus,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            is_staff: false,
            status: UserStatus::Free,
        }
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Task(EntryId),
    Project(ProjectId),
}

/// A persisted notice for one user. Only the `read` flag ever changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub subject: Subject,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
