//! Service layer. The public API for routing files through departments.
//!
//! The tracker owns the store, the department registry and the fan-out.
//! Every queue change goes through here: the state machine runs inside the
//! store's per-file transaction, then busy statuses are refreshed and users
//! are told about it on a background task.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

use crate::error::{Error, Result};
use crate::fanout::{Announcement, Fanout, FanoutReport, Publisher, RecipientScope};
use crate::model::{
    DepartmentId, EntryKey, EntryUpdate, FileId, NewEntry, Notification, NotificationId, Project,
    ProjectId, QueueEntry, UserId, UserStatus,
};
use crate::progress::{self, DepartmentLoad, ProjectProgress};
use crate::queue::{Cascade, Placement};
use crate::registry::DepartmentRegistry;
use crate::store::{Mutation, QueueStore};
use crate::telemetry::{metrics, queue as queue_telemetry};
use crate::view::{DepartmentFilter, FileView};

/// What a committed queue operation produced.
///
/// `change` describes how the chain reacted: a [`Placement`] for creates, a
/// [`Cascade`] for updates, the department that inherited permission for
/// deletes.
#[derive(Debug)]
pub struct Outcome<C> {
    /// The entry as committed (as it was just before removal for deletes).
    pub entry: QueueEntry,
    pub change: C,
    /// The file's projection after the change.
    pub file: FileView,
    pub project: Project,
    pub progress: ProjectProgress,
    /// Background delivery of notifications and view updates.
    pub fanout: JoinHandle<FanoutReport>,
}

pub type Created = Outcome<Placement>;
pub type Updated = Outcome<Cascade>;
pub type Deleted = Outcome<Option<DepartmentId>>;

/// The workflow tracker. Enforces the queue invariants for every file.
pub struct Tracker<S, P> {
    store: Arc<S>,
    registry: DepartmentRegistry,
    fanout: Fanout<S, P>,
}

impl<S: QueueStore, P: Publisher> Tracker<S, P> {
    pub fn new(
        store: Arc<S>,
        publisher: Arc<P>,
        registry: DepartmentRegistry,
        scope: RecipientScope,
    ) -> Self {
        let fanout = Fanout::new(Arc::clone(&store), publisher, scope);
        Self {
            store,
            registry,
            fanout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &DepartmentRegistry {
        &self.registry
    }

    /// Add a department to a file's queue.
    ///
    /// Permission is decided by where the department's order lands in the
    /// chain. Fails with `DuplicateQueueEntry` if the department is already
    /// queued for the file, leaving everything untouched.
    pub async fn create_entry(&self, new: NewEntry) -> Result<Created> {
        let key = new.key();
        let department = self.registry.require(key.department)?;
        let (order, name) = (department.order, department.name.clone());

        let span = queue_telemetry::start_queue_span("create", key.file, key.department);
        let started = Instant::now();
        let now = Utc::now();
        let entry = new.into_entry(order, now);

        let result = self
            .store
            .mutate_queue(key.file, move |queue| queue.insert(entry, now))
            .instrument(span.clone())
            .await;
        let mutation = observe("create", started, result)?;

        let placement = mutation.value;
        queue_telemetry::record_outcome(&span, &placement.to_string());
        if matches!(placement, Placement::Head | Placement::Middle) {
            metrics::queue_cascades().add(
                1,
                &[KeyValue::new("kind", format!("{placement}_insert"))],
            );
        }

        let entry = committed_entry(&mutation, key)?;
        info!(
            file = %key.file,
            department = %name,
            placement = %placement,
            permission = entry.permission,
            "queue entry created"
        );

        self.refresh_users(touched_users(&mutation)).await;

        let file = FileView::build(&mutation.snapshot(), &self.registry);
        let fanout = self.fanout.spawn(Announcement::TaskCreated {
            entry: entry.clone(),
            department: name,
            file: file.clone(),
            project: mutation.project.clone(),
        });

        Ok(Outcome {
            entry,
            change: placement,
            file,
            project: mutation.project,
            progress: mutation.progress,
            fanout,
        })
    }

    /// Change an entry. Setting `end` advances (`true`) or reverts (`false`)
    /// the chain.
    pub async fn update_entry(&self, key: EntryKey, update: EntryUpdate) -> Result<Updated> {
        self.registry.require(key.department)?;

        let span = queue_telemetry::start_queue_span("update", key.file, key.department);
        let started = Instant::now();
        let now = Utc::now();

        let result = self
            .store
            .mutate_queue(key.file, move |queue| {
                queue.update(key.department, &update, now)
            })
            .instrument(span.clone())
            .await;
        let mutation = observe("update", started, result)?;

        let cascade = mutation.value.clone();
        match &cascade {
            Cascade::None => queue_telemetry::record_outcome(&span, "none"),
            Cascade::Granted(next) => {
                queue_telemetry::record_outcome(&span, "granted");
                metrics::queue_cascades().add(1, &[KeyValue::new("kind", "granted")]);
                info!(file = %key.file, next = %next, "permission handed down the chain");
            }
            Cascade::Reset(downstream) => {
                queue_telemetry::record_outcome(&span, "reset");
                metrics::queue_cascades().add(
                    downstream.len() as u64,
                    &[KeyValue::new("kind", "reset")],
                );
                info!(
                    file = %key.file,
                    reset = downstream.len(),
                    "downstream departments reset"
                );
            }
        }

        let entry = committed_entry(&mutation, key)?;
        self.refresh_users(touched_users(&mutation)).await;

        let file = FileView::build(&mutation.snapshot(), &self.registry);
        let fanout = self.fanout.spawn(Announcement::TaskUpdated {
            entry: entry.clone(),
            file: file.clone(),
            project: mutation.project.clone(),
        });

        Ok(Outcome {
            entry,
            change: cascade,
            file,
            project: mutation.project,
            progress: mutation.progress,
            fanout,
        })
    }

    /// Take a department out of a file's queue.
    pub async fn delete_entry(&self, key: EntryKey) -> Result<Deleted> {
        let span = queue_telemetry::start_queue_span("delete", key.file, key.department);
        let started = Instant::now();
        let now = Utc::now();

        let result = self
            .store
            .mutate_queue(key.file, move |queue| queue.remove(key.department, now))
            .instrument(span.clone())
            .await;
        let mutation = observe("delete", started, result)?;

        let granted = mutation.value.granted;
        match granted {
            Some(heir) => {
                queue_telemetry::record_outcome(&span, "handoff");
                metrics::queue_cascades().add(1, &[KeyValue::new("kind", "handoff")]);
                info!(file = %key.file, heir = %heir, "queue entry deleted, permission passed on");
            }
            None => {
                queue_telemetry::record_outcome(&span, "none");
                info!(file = %key.file, department = %key.department, "queue entry deleted");
            }
        }

        let entry = mutation.value.removed.clone();
        self.refresh_users(touched_users(&mutation)).await;

        let file = FileView::build(&mutation.snapshot(), &self.registry);
        let fanout = self.fanout.spawn(Announcement::TaskDeleted {
            entry: entry.clone(),
            file: file.clone(),
            project: mutation.project.clone(),
        });

        Ok(Outcome {
            entry,
            change: granted,
            file,
            project: mutation.project,
            progress: mutation.progress,
            fanout,
        })
    }

    /// Recount a project's entries and persist percent and status.
    /// Safe to call any number of times.
    pub async fn recompute_project_progress(
        &self,
        project: ProjectId,
    ) -> Result<(Project, ProjectProgress)> {
        let (project, progress) = self.store.recompute_progress(project).await?;
        info!(
            project = %project.id,
            percent = progress.percent,
            status = %project.status,
            "project progress recomputed"
        );
        Ok((project, progress))
    }

    /// Derive Busy/Free from the user's assigned entries and persist it.
    pub async fn recompute_user_status(&self, user: UserId) -> Result<UserStatus> {
        let entries = self.store.user_entries(user).await?;
        let status = progress::busy_status(&entries, Utc::now());
        self.store.set_user_status(user, status).await?;
        Ok(status)
    }

    pub async fn file_view(&self, file: FileId) -> Result<FileView> {
        let snapshot = self.store.file_snapshot(file).await?;
        Ok(FileView::build(&snapshot, &self.registry))
    }

    /// Files the department is working on (or has finished), each showing
    /// only that department's entry.
    pub async fn department_view(
        &self,
        department: DepartmentId,
        filter: DepartmentFilter,
    ) -> Result<Vec<FileView>> {
        self.registry.require(department)?;
        let snapshots = self
            .store
            .department_files(department, filter.ended())
            .await?;
        Ok(snapshots
            .iter()
            .map(|s| FileView::build(s, &self.registry).only_department(department))
            .collect())
    }

    /// Entry counts for every registered department, in chain order.
    pub async fn department_load(&self) -> Result<Vec<DepartmentLoad>> {
        let counts = self.store.department_counts().await?;
        Ok(self
            .registry
            .departments_sorted()
            .iter()
            .map(|d| {
                let count = counts.iter().find(|c| c.department_id == d.id);
                DepartmentLoad {
                    department_id: d.id,
                    department: d.name.clone(),
                    quantity: count.map_or(0, |c| c.total),
                    active: count.map_or(0, |c| c.active),
                }
            })
            .collect())
    }

    pub async fn notifications(&self, user: UserId, unread_only: bool) -> Result<Vec<Notification>> {
        self.store.notifications_for(user, unread_only).await
    }

    pub async fn mark_notification_read(&self, id: NotificationId) -> Result<Notification> {
        self.store.mark_notification_read(id).await
    }

    /// Busy/Free follows the commit. A failure here leaves a stale status
    /// until the next recompute, so it is logged rather than returned.
    async fn refresh_users(&self, users: impl IntoIterator<Item = UserId>) {
        for user in users {
            if let Err(e) = self.recompute_user_status(user).await {
                warn!(user = %user, error = %e, "cannot recompute user status");
            }
        }
    }
}

/// Record the operation's metrics and pass the result through.
fn observe<T>(operation: &'static str, started: Instant, result: Result<T>) -> Result<T> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) if e.is_validation() => "rejected",
        Err(_) => "error",
    };
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", outcome),
        ],
    );
    metrics::operation_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
    if let Err(e) = &result {
        if e.is_validation() {
            info!(operation, error = %e, "queue operation rejected");
        } else {
            warn!(operation, error = %e, "queue operation failed");
        }
    }
    result
}

/// Users assigned to any entry the mutation changed, before or after. A
/// cascade can flip `end` on entries other than the one addressed.
fn touched_users<T>(mutation: &Mutation<T>) -> BTreeSet<UserId> {
    let diff = mutation.queue.diff(&mutation.before);
    let mut users = BTreeSet::new();
    for entry in diff.inserted.iter().chain(&diff.updated).chain(&diff.removed) {
        users.extend(entry.users.iter().copied());
        if let Some(old) = mutation
            .before
            .iter()
            .find(|e| e.department_id == entry.department_id)
        {
            users.extend(old.users.iter().copied());
        }
    }
    users
}

fn committed_entry<T>(mutation: &Mutation<T>, key: EntryKey) -> Result<QueueEntry> {
    mutation
        .queue
        .get(key.department)
        .cloned()
        .ok_or(Error::EntryNotFound(key))
}
