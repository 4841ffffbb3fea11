//! Queue entries: the (file, department) permission and lifecycle record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DepartmentId, EntryId, FileId, UserId};

/// Natural key of a queue entry. At most one entry exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub file: FileId,
    pub department: DepartmentId,
}

impl EntryKey {
    pub fn new(file: FileId, department: DepartmentId) -> Self {
        Self { file, department }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.file, self.department)
    }
}

/// One department's slot in a file's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub file_id: FileId,
    pub department_id: DepartmentId,
    /// Copied from the department registry when the queue is loaded.
    pub department_order: i32,

    /// This department may begin or continue work.
    pub permission: bool,
    pub start: bool,
    pub paused: bool,
    pub end: bool,

    /// Scheduling metadata. Never gates permission.
    pub planned_start: Option<DateTime<Utc>>,
    pub planned_end: Option<DateTime<Utc>>,

    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Workers assigned to this task.
    pub users: BTreeSet<UserId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.file_id, self.department_id)
    }

    /// Conceptual lifecycle state derived from the flags.
    pub fn state(&self) -> EntryState {
        if self.end {
            EntryState::Ended
        } else if !self.permission {
            EntryState::Blocked
        } else if self.paused {
            EntryState::Paused
        } else if self.start {
            EntryState::Started
        } else {
            EntryState::Ready
        }
    }

    /// Clear permission and every lifecycle flag. The department must redo
    /// its gating from scratch.
    pub(crate) fn reset(&mut self, now: DateTime<Utc>) {
        self.permission = false;
        self.start = false;
        self.paused = false;
        self.end = false;
        self.started_at = None;
        self.paused_at = None;
        self.ended_at = None;
        self.updated_at = now;
    }

    /// Is `at` inside the planned window? Entries without a complete window
    /// never match.
    pub fn planned_window_contains(&self, at: DateTime<Utc>) -> bool {
        match (self.planned_start, self.planned_end) {
            (Some(start), Some(end)) => start <= at && at <= end,
            _ => false,
        }
    }
}

/// Per-entry lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting on an upstream department.
    Blocked,
    /// Permitted, not started.
    Ready,
    Started,
    Paused,
    /// Finished for this pass. Reverting makes it non-terminal again.
    Ended,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryState::Blocked => "blocked",
            EntryState::Ready => "ready",
            EntryState::Started => "started",
            EntryState::Paused => "paused",
            EntryState::Ended => "ended",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Request to add a department to a file's queue.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub(crate) file: FileId,
    pub(crate) department: DepartmentId,
    pub(crate) users: BTreeSet<UserId>,
    pub(crate) planned_start: Option<DateTime<Utc>>,
    pub(crate) planned_end: Option<DateTime<Utc>>,
}

impl NewEntry {
    pub fn new(file: FileId, department: DepartmentId) -> Self {
        Self {
            file,
            department,
            users: BTreeSet::new(),
            planned_start: None,
            planned_end: None,
        }
    }

    pub fn user(mut self, user: UserId) -> Self {
        self.users.insert(user);
        self
    }

    pub fn users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.users.extend(users);
        self
    }

    pub fn planned(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.planned_start = Some(start);
        self.planned_end = Some(end);
        self
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.file, self.department)
    }

    /// Materialize the entry. Permission is decided by the queue on insert.
    pub(crate) fn into_entry(self, department_order: i32, now: DateTime<Utc>) -> QueueEntry {
        QueueEntry {
            id: EntryId::new(),
            file_id: self.file,
            department_id: self.department,
            department_order,
            permission: false,
            start: false,
            paused: false,
            end: false,
            planned_start: self.planned_start,
            planned_end: self.planned_end,
            started_at: None,
            paused_at: None,
            ended_at: None,
            users: self.users,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Changes requested on an existing entry.
///
/// `end` drives the advance/revert cascade; `None` leaves the chain alone.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub end: Option<bool>,
    pub start: Option<bool>,
    pub paused: Option<bool>,
    pub planned_start: Option<Option<DateTime<Utc>>>,
    pub planned_end: Option<Option<DateTime<Utc>>>,
    pub users: Option<BTreeSet<UserId>>,
}

impl EntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn end(mut self, end: bool) -> Self {
        self.end = Some(end);
        self
    }

    pub fn start(mut self, start: bool) -> Self {
        self.start = Some(start);
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn planned(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.planned_start = Some(start);
        self.planned_end = Some(end);
        self
    }

    pub fn users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.users = Some(users.into_iter().collect());
        self
    }

    /// Does this update touch start/pause/end?
    pub fn changes_lifecycle(&self) -> bool {
        self.end.is_some() || self.start.is_some() || self.paused.is_some()
    }
}
