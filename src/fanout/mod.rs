//! Notification and event fan-out.
//!
//! After a queue mutation commits, the tracker hands an [`Announcement`] to
//! [`Fanout`], which persists task notifications and publishes envelopes to
//! per-user topics. Delivery is best effort: failures are logged and
//! counted, never retried, and never reach the caller.

pub mod dedup;
pub mod hub;

pub use dedup::RecentIds;
pub use hub::{Hub, Subscription};

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use crate::error::{Error, Result};
use crate::event::{Envelope, EventKind, Topic};
use crate::model::{Notification, NotificationId, Project, QueueEntry, Subject, UserId};
use crate::store::QueueStore;
use crate::telemetry::metrics;
use crate::view::FileView;

/// Something that can put an envelope on its topic.
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, envelope: &Envelope) -> impl Future<Output = Result<()>> + Send;
}

impl<P: Publisher> Publisher for Arc<P> {
    fn publish(&self, envelope: &Envelope) -> impl Future<Output = Result<()>> + Send {
        (**self).publish(envelope)
    }
}

/// Publish the same envelope through two signal paths. Consumers listening
/// on both see the same `message_id` twice and keep one.
impl<A: Publisher, B: Publisher> Publisher for (A, B) {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let first = self.0.publish(envelope).await;
        let second = self.1.publish(envelope).await;
        match (first, second) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(a), Err(b)) => Err(Error::Other(format!("both paths failed: {a}; {b}"))),
        }
    }
}

/// Who gets a task notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecipientScope {
    /// Every user.
    #[default]
    AllUsers,
    /// Only the users assigned to the entry.
    Assigned,
}

impl std::str::FromStr for RecipientScope {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(RecipientScope::AllUsers),
            "assigned" => Ok(RecipientScope::Assigned),
            other => Err(Error::Config(format!(
                "NOTIFY_SCOPE must be \"all\" or \"assigned\", got {other:?}"
            ))),
        }
    }
}

/// A committed change worth telling users about.
#[derive(Debug, Clone)]
pub enum Announcement {
    TaskCreated {
        entry: QueueEntry,
        department: String,
        file: FileView,
        project: Project,
    },
    TaskUpdated {
        entry: QueueEntry,
        file: FileView,
        project: Project,
    },
    TaskDeleted {
        entry: QueueEntry,
        file: FileView,
        project: Project,
    },
}

impl Announcement {
    pub fn name(&self) -> &'static str {
        match self {
            Announcement::TaskCreated { .. } => "task_created",
            Announcement::TaskUpdated { .. } => "task_updated",
            Announcement::TaskDeleted { .. } => "task_deleted",
        }
    }

    fn parts(&self) -> (&QueueEntry, &FileView, &Project) {
        match self {
            Announcement::TaskCreated {
                entry,
                file,
                project,
                ..
            }
            | Announcement::TaskUpdated {
                entry,
                file,
                project,
            }
            | Announcement::TaskDeleted {
                entry,
                file,
                project,
            } => (entry, file, project),
        }
    }
}

/// What one delivery achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub notifications: usize,
    pub published: usize,
    pub failed: usize,
}

/// Delivers announcements to users.
pub struct Fanout<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    scope: RecipientScope,
}

impl<S, P> Clone for Fanout<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            scope: self.scope,
        }
    }
}

impl<S: QueueStore, P: Publisher> Fanout<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>, scope: RecipientScope) -> Self {
        Self {
            store,
            publisher,
            scope,
        }
    }

    /// Deliver on a background task.
    pub fn spawn(&self, announcement: Announcement) -> JoinHandle<FanoutReport> {
        let this = self.clone();
        let span = tracing::info_span!("fanout", announcement = announcement.name());
        tokio::spawn(async move { this.deliver(announcement).await }.instrument(span))
    }

    /// Deliver now. Never fails; problems end up in the report and the logs.
    pub async fn deliver(&self, announcement: Announcement) -> FanoutReport {
        let mut report = FanoutReport::default();

        let audience = match self.store.user_ids().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "cannot enumerate users, dropping announcement");
                metrics::fanout_failures().add(1, &[KeyValue::new("stage", "audience")]);
                report.failed += 1;
                return report;
            }
        };

        if let Announcement::TaskCreated {
            entry,
            department,
            file,
            ..
        } = &announcement
        {
            self.notify_task_created(entry, department, file, &audience, &mut report)
                .await;
        }

        let (entry, file, project) = announcement.parts();
        for &user in &audience {
            self.publish(
                Topic::Projects(user),
                EventKind::ProjectProgress {
                    project_id: project.id,
                    progress: project.progress,
                    status: project.status,
                },
                &mut report,
            )
            .await;

            if matches!(announcement, Announcement::TaskDeleted { .. }) {
                self.publish(
                    Topic::DepartmentView(user),
                    EventKind::TaskRemoved {
                        file_id: entry.file_id,
                        department_id: entry.department_id,
                    },
                    &mut report,
                )
                .await;
            }

            for topic in [Topic::ProjectView(user), Topic::DepartmentView(user)] {
                self.publish(
                    topic,
                    EventKind::FileChanged {
                        file: Box::new(file.clone()),
                    },
                    &mut report,
                )
                .await;
            }
        }

        debug!(
            notifications = report.notifications,
            published = report.published,
            failed = report.failed,
            "fanout finished"
        );
        report
    }

    async fn notify_task_created(
        &self,
        entry: &QueueEntry,
        department: &str,
        file: &FileView,
        audience: &[UserId],
        report: &mut FanoutReport,
    ) {
        let recipients: Vec<UserId> = match self.scope {
            RecipientScope::AllUsers => audience.to_vec(),
            RecipientScope::Assigned => entry.users.iter().copied().collect(),
        };
        let now = Utc::now();
        let notifications: Vec<Notification> = recipients
            .iter()
            .map(|&recipient| Notification {
                id: NotificationId::new(),
                recipient,
                subject: Subject::Task(entry.id),
                content: format!("New task: {} in {department}", file.file.name),
                read: false,
                created_at: now,
            })
            .collect();

        // Without a persisted record there is nothing to point the live
        // message at.
        if let Err(e) = self.store.insert_notifications(&notifications).await {
            warn!(error = %e, count = notifications.len(), "cannot persist notifications");
            metrics::fanout_failures().add(1, &[KeyValue::new("stage", "notifications")]);
            report.failed += 1;
            return;
        }
        report.notifications += notifications.len();
        metrics::notifications_created().add(notifications.len() as u64, &[]);

        for notification in notifications {
            self.publish(
                Topic::Tasks(notification.recipient),
                EventKind::TaskCreated { notification },
                report,
            )
            .await;
        }
    }

    async fn publish(&self, topic: Topic, event: EventKind, report: &mut FanoutReport) {
        let envelope = Envelope::new(topic, event);
        let labels = [
            KeyValue::new("topic", topic.kind()),
            KeyValue::new("event", envelope.event.name()),
        ];
        match self.publisher.publish(&envelope).await {
            Ok(()) => {
                report.published += 1;
                metrics::fanout_published().add(1, &labels);
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    topic = %topic,
                    message_id = %envelope.message_id,
                    error = %e,
                    "publish failed"
                );
                metrics::fanout_failures().add(1, &labels);
            }
        }
    }
}
