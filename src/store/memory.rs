//! In-process store.
//!
//! One mutex guards all state, so every queue mutation is serialized, which
//! subsumes the per-file lock the Postgres store takes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{
    Comment, CommentId, DepartmentId, Destiny, File, FileId, Notification, NotificationId,
    Project, ProjectId, QueueEntry, User, UserId, UserStatus,
};
use crate::progress::{self, ProjectProgress};
use crate::queue::FileQueue;
use crate::view::FileSnapshot;

use super::{DepartmentCount, Mutation, QueueStore};

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    projects: HashMap<ProjectId, Project>,
    files: HashMap<FileId, File>,
    /// Per file, sorted by department order.
    entries: HashMap<FileId, Vec<QueueEntry>>,
    comments: Vec<Comment>,
    notifications: Vec<Notification>,
}

impl Inner {
    fn snapshot(&self, file: FileId) -> Result<FileSnapshot> {
        let record = self.files.get(&file).ok_or(Error::FileNotFound(file))?;
        let project = self
            .projects
            .get(&record.project_id)
            .ok_or(Error::ProjectNotFound(record.project_id))?;
        Ok(FileSnapshot {
            queue: FileQueue::new(
                record.clone(),
                self.entries.get(&file).cloned().unwrap_or_default(),
            ),
            project: project.clone(),
            comments: self
                .comments
                .iter()
                .filter(|c| c.file_id == file)
                .cloned()
                .collect(),
        })
    }

    fn recompute(&mut self, id: ProjectId) -> Result<(Project, ProjectProgress)> {
        let (mut total, mut done) = (0u64, 0u64);
        for (file_id, entries) in &self.entries {
            let owned = self
                .files
                .get(file_id)
                .is_some_and(|f| f.project_id == id);
            if owned {
                total += entries.len() as u64;
                done += entries.iter().filter(|e| e.end).count() as u64;
            }
        }
        let progress = ProjectProgress::from_counts(total, done);
        let project = self.projects.get_mut(&id).ok_or(Error::ProjectNotFound(id))?;
        progress::apply(project, &progress);
        Ok((project.clone(), progress))
    }
}

/// Store that keeps everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, user: User) -> UserId {
        let id = user.id;
        self.lock().users.insert(id, user);
        id
    }

    pub fn user(&self, id: UserId) -> Result<User> {
        self.lock()
            .users
            .get(&id)
            .cloned()
            .ok_or(Error::UserNotFound(id))
    }

    pub fn add_project(&self, project: Project) -> ProjectId {
        let id = project.id;
        self.lock().projects.insert(id, project);
        id
    }

    pub fn add_file(
        &self,
        project: ProjectId,
        name: impl Into<String>,
        destiny: Destiny,
    ) -> Result<FileId> {
        let mut inner = self.lock();
        if !inner.projects.contains_key(&project) {
            return Err(Error::ProjectNotFound(project));
        }
        let file = File {
            id: FileId::new(),
            project_id: project,
            name: name.into(),
            destiny,
            new: true,
        };
        let id = file.id;
        inner.files.insert(id, file);
        Ok(id)
    }

    pub fn add_comment(&self, file: FileId, user: UserId, text: impl Into<String>) -> Result<Comment> {
        let mut inner = self.lock();
        if !inner.files.contains_key(&file) {
            return Err(Error::FileNotFound(file));
        }
        let comment = Comment {
            id: CommentId::new(),
            file_id: file,
            user,
            text: text.into(),
            posted_at: Utc::now(),
            read: false,
        };
        inner.comments.push(comment.clone());
        Ok(comment)
    }
}

impl QueueStore for MemoryStore {
    async fn mutate_queue<T, F>(&self, file: FileId, f: F) -> Result<Mutation<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut FileQueue) -> Result<T> + Send + 'static,
    {
        let mut inner = self.lock();
        let snapshot = inner.snapshot(file)?;
        let before = snapshot.queue.entries().to_vec();
        let comments = snapshot.comments;
        let mut queue = snapshot.queue;

        let value = f(&mut queue)?;

        let (record, entries) = queue.clone().into_parts();
        let project_id = record.project_id;
        inner.files.insert(file, record);
        inner.entries.insert(file, entries);
        let (project, progress) = inner.recompute(project_id)?;

        Ok(Mutation {
            value,
            before,
            queue,
            project,
            progress,
            comments,
        })
    }

    async fn file_snapshot(&self, file: FileId) -> Result<FileSnapshot> {
        self.lock().snapshot(file)
    }

    async fn department_files(
        &self,
        department: DepartmentId,
        ended: bool,
    ) -> Result<Vec<FileSnapshot>> {
        let inner = self.lock();
        let mut files: Vec<FileId> = inner
            .entries
            .iter()
            .filter(|(_, entries)| {
                entries
                    .iter()
                    .any(|e| e.department_id == department && e.end == ended)
            })
            .map(|(file, _)| *file)
            .collect();
        files.sort();
        files.into_iter().map(|f| inner.snapshot(f)).collect()
    }

    async fn recompute_progress(&self, id: ProjectId) -> Result<(Project, ProjectProgress)> {
        self.lock().recompute(id)
    }

    async fn user_ids(&self) -> Result<Vec<UserId>> {
        Ok(self.lock().users.keys().copied().collect())
    }

    async fn user_entries(&self, user: UserId) -> Result<Vec<QueueEntry>> {
        Ok(self
            .lock()
            .entries
            .values()
            .flatten()
            .filter(|e| e.users.contains(&user))
            .cloned()
            .collect())
    }

    async fn set_user_status(&self, user: UserId, status: UserStatus) -> Result<()> {
        let mut inner = self.lock();
        let record = inner.users.get_mut(&user).ok_or(Error::UserNotFound(user))?;
        record.status = status;
        Ok(())
    }

    async fn insert_notifications(&self, notifications: &[Notification]) -> Result<()> {
        self.lock()
            .notifications
            .extend(notifications.iter().cloned());
        Ok(())
    }

    async fn notifications_for(&self, user: UserId, unread_only: bool) -> Result<Vec<Notification>> {
        let inner = self.lock();
        let mut found: Vec<Notification> = inner
            .notifications
            .iter()
            .filter(|n| n.recipient == user && !(unread_only && n.read))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<Notification> {
        let mut inner = self.lock();
        let notification = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(Error::NotificationNotFound(id))?;
        notification.read = true;
        Ok(notification.clone())
    }

    async fn department_counts(&self) -> Result<Vec<DepartmentCount>> {
        let inner = self.lock();
        let mut counts: BTreeMap<DepartmentId, DepartmentCount> = BTreeMap::new();
        for entry in inner.entries.values().flatten() {
            let count = counts
                .entry(entry.department_id)
                .or_insert(DepartmentCount {
                    department_id: entry.department_id,
                    total: 0,
                    active: 0,
                });
            count.total += 1;
            if !entry.end {
                count.active += 1;
            }
        }
        Ok(counts.into_values().collect())
    }
}
