//! Queue entry persistence.
//!
//! [`QueueStore`] is the boundary between the tracker and a backend. The
//! Postgres implementation lives in [`crate::db`]; [`MemoryStore`] keeps
//! everything in process for tests and local tooling.

pub mod memory;

pub use memory::MemoryStore;

use std::future::Future;

use crate::error::Result;
use crate::model::{
    Comment, DepartmentId, FileId, Notification, NotificationId, Project, ProjectId, QueueEntry, UserId,
    UserStatus,
};
use crate::progress::ProjectProgress;
use crate::queue::FileQueue;
use crate::view::FileSnapshot;

/// Outcome of a committed queue mutation.
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    /// Whatever the mutating closure returned.
    pub value: T,
    /// The queue as it was loaded, before the closure ran.
    pub before: Vec<QueueEntry>,
    /// The queue as committed.
    pub queue: FileQueue,
    /// The owning project with recomputed progress and status.
    pub project: Project,
    pub progress: ProjectProgress,
    /// The file's comments, for projections.
    pub comments: Vec<Comment>,
}

impl<T> Mutation<T> {
    /// The committed state of the file, ready to project.
    pub fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            queue: self.queue.clone(),
            project: self.project.clone(),
            comments: self.comments.clone(),
        }
    }
}

/// Entry counts for one department.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepartmentCount {
    pub department_id: DepartmentId,
    pub total: u64,
    pub active: u64,
}

pub trait QueueStore: Send + Sync + 'static {
    /// Load a file's queue under an exclusive per-file lock, apply `f`,
    /// persist whatever changed and recompute the owning project's progress,
    /// all atomically. If `f` fails nothing is written.
    fn mutate_queue<T, F>(&self, file: FileId, f: F) -> impl Future<Output = Result<Mutation<T>>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut FileQueue) -> Result<T> + Send + 'static;

    /// The file, its queue, comments and owning project.
    fn file_snapshot(&self, file: FileId) -> impl Future<Output = Result<FileSnapshot>> + Send;

    /// Files having an entry for `department` whose `end` equals `ended`.
    fn department_files(
        &self,
        department: DepartmentId,
        ended: bool,
    ) -> impl Future<Output = Result<Vec<FileSnapshot>>> + Send;

    /// Count the project's entries and persist percent and status.
    fn recompute_progress(
        &self,
        id: ProjectId,
    ) -> impl Future<Output = Result<(Project, ProjectProgress)>> + Send;

    /// Every user; the broadcast audience.
    fn user_ids(&self) -> impl Future<Output = Result<Vec<UserId>>> + Send;

    /// Entries the user is assigned to.
    fn user_entries(&self, user: UserId) -> impl Future<Output = Result<Vec<QueueEntry>>> + Send;

    fn set_user_status(
        &self,
        user: UserId,
        status: UserStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    fn insert_notifications(
        &self,
        notifications: &[Notification],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Newest first.
    fn notifications_for(
        &self,
        user: UserId,
        unread_only: bool,
    ) -> impl Future<Output = Result<Vec<Notification>>> + Send;

    fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> impl Future<Output = Result<Notification>> + Send;

    /// Entry counts per department that has at least one entry.
    fn department_counts(&self) -> impl Future<Output = Result<Vec<DepartmentCount>>> + Send;
}
