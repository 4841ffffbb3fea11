//! Postgres-backed [`QueueStore`].
//!
//! A queue mutation runs in one transaction: the file row is locked with
//! `FOR UPDATE`, the queue is loaded and handed to the state machine, the
//! diff is written back and the project's progress is recounted before
//! commit. Concurrent mutations of one file therefore serialize on the row
//! lock; the unique `(file_id, department_id)` index backs up duplicate
//! detection.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Comment, CommentId, DepartmentId, EntryId, File, FileId, Notification, NotificationId,
    Project, ProjectId, QueueEntry, Subject, UserId, UserStatus,
};
use crate::progress::{self, ProjectProgress};
use crate::queue::FileQueue;
use crate::store::{DepartmentCount, Mutation, QueueStore};
use crate::telemetry::metrics;
use crate::view::FileSnapshot;

use super::Db;

const ENTRY_COLUMNS: &str = "
    e.id, e.file_id, e.department_id, d.sort_order, e.permission, e.started, e.paused,
    e.ended, e.planned_start, e.planned_end, e.started_at, e.paused_at, e.ended_at,
    e.created_at, e.updated_at,
    COALESCE(array_agg(u.user_id) FILTER (WHERE u.user_id IS NOT NULL), '{}'::uuid[]) AS users";

const ENTRY_JOINS: &str = "
    FROM queue_entries e
    JOIN departments d ON d.id = e.department_id
    LEFT JOIN queue_entry_users u ON u.entry_id = e.id";

impl QueueStore for Db {
    async fn mutate_queue<T, F>(&self, file: FileId, f: F) -> Result<Mutation<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut FileQueue) -> Result<T> + Send + 'static,
    {
        let started = std::time::Instant::now();
        let mut tx = self.pool().begin().await?;

        let record: Option<FileRow> = sqlx::query_as(
            "SELECT id, project_id, name, destiny, new FROM files WHERE id = $1 FOR UPDATE",
        )
        .bind(file.0)
        .fetch_optional(&mut *tx)
        .await?;
        let record = record.ok_or(Error::FileNotFound(file))?.try_into_file()?;

        let before = load_entries(&mut tx, file).await?;
        let mut queue = FileQueue::new(record.clone(), before.clone());

        // Dropping `tx` on error rolls back; nothing has been written yet.
        let value = f(&mut queue)?;

        let diff = queue.diff(&before);
        for entry in &diff.removed {
            sqlx::query("DELETE FROM queue_entries WHERE id = $1")
                .bind(entry.id.0)
                .execute(&mut *tx)
                .await?;
        }
        for entry in &diff.inserted {
            insert_entry(&mut tx, entry).await?;
        }
        for entry in &diff.updated {
            update_entry(&mut tx, entry).await?;
        }
        if queue.file().new != record.new {
            sqlx::query("UPDATE files SET new = $1 WHERE id = $2")
                .bind(queue.file().new)
                .bind(file.0)
                .execute(&mut *tx)
                .await?;
        }

        let (project, progress) = recompute_on(&mut tx, record.project_id).await?;
        let comments = load_comments(&mut tx, file).await?;
        tx.commit().await?;

        debug!(
            file = %file,
            inserted = diff.inserted.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "queue committed"
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "db.mutate_queue")],
        );

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
        let mut conn = self.pool().acquire().await?;
        snapshot_on(&mut conn, file).await
    }

    async fn department_files(
        &self,
        department: DepartmentId,
        ended: bool,
    ) -> Result<Vec<FileSnapshot>> {
        let mut conn = self.pool().acquire().await?;
        let files: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT file_id FROM queue_entries
             WHERE department_id = $1 AND ended = $2
             ORDER BY file_id",
        )
        .bind(department.0)
        .bind(ended)
        .fetch_all(&mut *conn)
        .await?;

        let mut snapshots = Vec::with_capacity(files.len());
        for (file,) in files {
            snapshots.push(snapshot_on(&mut conn, FileId(file)).await?);
        }
        Ok(snapshots)
    }

    async fn recompute_progress(&self, id: ProjectId) -> Result<(Project, ProjectProgress)> {
        let mut tx = self.pool().begin().await?;
        let result = recompute_on(&mut tx, id).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn user_ids(&self) -> Result<Vec<UserId>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM users ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
    }

    async fn user_entries(&self, user: UserId) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} {ENTRY_JOINS}
             WHERE e.id IN (SELECT entry_id FROM queue_entry_users WHERE user_id = $1)
             GROUP BY e.id, d.sort_order
             ORDER BY e.file_id, d.sort_order"
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(user.0)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(EntryRow::into_entry).collect())
    }

    async fn set_user_status(&self, user: UserId, status: UserStatus) -> Result<()> {
        let rows_affected = sqlx::query("UPDATE users SET status = $1 WHERE id = $2")
            .bind(status.to_string())
            .bind(user.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(Error::UserNotFound(user));
        }
        Ok(())
    }

    async fn insert_notifications(&self, notifications: &[Notification]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for n in notifications {
            let (kind, subject) = match n.subject {
                Subject::Task(id) => ("task", id.0),
                Subject::Project(id) => ("project", id.0),
            };
            sqlx::query(
                "INSERT INTO notifications (id, recipient_id, subject_kind, subject_id, content, read, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(n.id.0)
            .bind(n.recipient.0)
            .bind(kind)
            .bind(subject)
            .bind(&n.content)
            .bind(n.read)
            .bind(n.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn notifications_for(&self, user: UserId, unread_only: bool) -> Result<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            "SELECT id, recipient_id, subject_kind, subject_id, content, read, created_at
             FROM notifications
             WHERE recipient_id = $1 AND (NOT $2 OR NOT read)
             ORDER BY created_at DESC",
        )
        .bind(user.0)
        .bind(unread_only)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(NotificationRow::try_into_notification).collect()
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<Notification> {
        let row: Option<NotificationRow> = sqlx::query_as(
            "UPDATE notifications SET read = TRUE WHERE id = $1
             RETURNING id, recipient_id, subject_kind, subject_id, content, read, created_at",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or(Error::NotificationNotFound(id))?
            .try_into_notification()
    }

    async fn department_counts(&self) -> Result<Vec<DepartmentCount>> {
        let rows: Vec<(Uuid, i64, i64)> = sqlx::query_as(
            "SELECT department_id, COUNT(*), COUNT(*) FILTER (WHERE NOT ended)
             FROM queue_entries GROUP BY department_id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(department_id, total, active)| DepartmentCount {
                department_id: DepartmentId(department_id),
                total: total as u64,
                active: active as u64,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers, shared by pool reads and transactions
// ---------------------------------------------------------------------------

async fn snapshot_on(conn: &mut PgConnection, file: FileId) -> Result<FileSnapshot> {
    let record: Option<FileRow> =
        sqlx::query_as("SELECT id, project_id, name, destiny, new FROM files WHERE id = $1")
            .bind(file.0)
            .fetch_optional(&mut *conn)
            .await?;
    let record = record.ok_or(Error::FileNotFound(file))?.try_into_file()?;
    let project = load_project(conn, record.project_id, false).await?;
    let entries = load_entries(conn, file).await?;
    let comments = load_comments(conn, file).await?;
    Ok(FileSnapshot {
        queue: FileQueue::new(record, entries),
        project,
        comments,
    })
}

async fn load_entries(conn: &mut PgConnection, file: FileId) -> Result<Vec<QueueEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} {ENTRY_JOINS}
         WHERE e.file_id = $1
         GROUP BY e.id, d.sort_order
         ORDER BY d.sort_order"
    );
    let rows: Vec<EntryRow> = sqlx::query_as(&sql)
        .bind(file.0)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(EntryRow::into_entry).collect())
}

async fn load_comments(conn: &mut PgConnection, file: FileId) -> Result<Vec<Comment>> {
    let rows: Vec<(Uuid, Uuid, Uuid, String, DateTime<Utc>, bool)> = sqlx::query_as(
        "SELECT id, file_id, user_id, text, posted_at, read FROM comments
         WHERE file_id = $1 ORDER BY posted_at",
    )
    .bind(file.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, file_id, user, text, posted_at, read)| Comment {
            id: CommentId(id),
            file_id: FileId(file_id),
            user: UserId(user),
            text,
            posted_at,
            read,
        })
        .collect())
}

async fn load_project(conn: &mut PgConnection, id: ProjectId, lock: bool) -> Result<Project> {
    let sql = if lock {
        "SELECT id, number, manager_id, progress, status FROM projects WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, number, manager_id, progress, status FROM projects WHERE id = $1"
    };
    let row: Option<(Uuid, String, Uuid, i16, String)> = sqlx::query_as(sql)
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?;
    let (id, number, manager, progress, status) = row.ok_or(Error::ProjectNotFound(id))?;
    Ok(Project {
        id: ProjectId(id),
        number,
        manager: UserId(manager),
        progress: progress.clamp(0, 100) as u8,
        status: status.parse()?,
    })
}

/// Count the project's entries and write percent and status.
async fn recompute_on(
    conn: &mut PgConnection,
    id: ProjectId,
) -> Result<(Project, ProjectProgress)> {
    let mut project = load_project(conn, id, true).await?;
    let (total, done): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE e.ended)
         FROM queue_entries e JOIN files f ON f.id = e.file_id
         WHERE f.project_id = $1",
    )
    .bind(id.0)
    .fetch_one(&mut *conn)
    .await?;

    let progress = ProjectProgress::from_counts(total as u64, done as u64);
    if progress::apply(&mut project, &progress) {
        sqlx::query("UPDATE projects SET progress = $1, status = $2 WHERE id = $3")
            .bind(i16::from(project.progress))
            .bind(project.status.to_string())
            .bind(id.0)
            .execute(&mut *conn)
            .await?;
    }
    Ok((project, progress))
}

async fn insert_entry(conn: &mut PgConnection, entry: &QueueEntry) -> Result<()> {
    let result = sqlx::query(
        "INSERT INTO queue_entries
            (id, file_id, department_id, permission, started, paused, ended,
             planned_start, planned_end, started_at, paused_at, ended_at, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(entry.id.0)
    .bind(entry.file_id.0)
    .bind(entry.department_id.0)
    .bind(entry.permission)
    .bind(entry.start)
    .bind(entry.paused)
    .bind(entry.end)
    .bind(entry.planned_start)
    .bind(entry.planned_end)
    .bind(entry.started_at)
    .bind(entry.paused_at)
    .bind(entry.ended_at)
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => {}
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(Error::DuplicateQueueEntry {
                file: entry.file_id,
                department: entry.department_id,
            });
        }
        Err(e) => return Err(e.into()),
    }

    replace_users(conn, entry).await
}

async fn update_entry(conn: &mut PgConnection, entry: &QueueEntry) -> Result<()> {
    sqlx::query(
        "UPDATE queue_entries SET
            permission = $1, started = $2, paused = $3, ended = $4,
            planned_start = $5, planned_end = $6,
            started_at = $7, paused_at = $8, ended_at = $9, updated_at = $10
         WHERE id = $11",
    )
    .bind(entry.permission)
    .bind(entry.start)
    .bind(entry.paused)
    .bind(entry.end)
    .bind(entry.planned_start)
    .bind(entry.planned_end)
    .bind(entry.started_at)
    .bind(entry.paused_at)
    .bind(entry.ended_at)
    .bind(entry.updated_at)
    .bind(entry.id.0)
    .execute(&mut *conn)
    .await?;

    replace_users(conn, entry).await
}

async fn replace_users(conn: &mut PgConnection, entry: &QueueEntry) -> Result<()> {
    sqlx::query("DELETE FROM queue_entry_users WHERE entry_id = $1")
        .bind(entry.id.0)
        .execute(&mut *conn)
        .await?;
    if entry.users.is_empty() {
        return Ok(());
    }
    let users: Vec<Uuid> = entry.users.iter().map(|u| u.0).collect();
    let result = sqlx::query(
        "INSERT INTO queue_entry_users (entry_id, user_id) SELECT $1, unnest($2::uuid[])",
    )
    .bind(entry.id.0)
    .bind(&users)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => Err(Error::Other(
            format!("entry {} assigns an unknown user", entry.key()),
        )),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    destiny: String,
    new: bool,
}

impl FileRow {
    fn try_into_file(self) -> Result<File> {
        Ok(File {
            id: FileId(self.id),
            project_id: ProjectId(self.project_id),
            name: self.name,
            destiny: self.destiny.parse()?,
            new: self.new,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    file_id: Uuid,
    department_id: Uuid,
    sort_order: i32,
    permission: bool,
    started: bool,
    paused: bool,
    ended: bool,
    planned_start: Option<DateTime<Utc>>,
    planned_end: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    users: Vec<Uuid>,
}

impl EntryRow {
    fn into_entry(self) -> QueueEntry {
        QueueEntry {
            id: EntryId(self.id),
            file_id: FileId(self.file_id),
            department_id: DepartmentId(self.department_id),
            department_order: self.sort_order,
            permission: self.permission,
            start: self.started,
            paused: self.paused,
            end: self.ended,
            planned_start: self.planned_start,
            planned_end: self.planned_end,
            started_at: self.started_at,
            paused_at: self.paused_at,
            ended_at: self.ended_at,
            users: self.users.into_iter().map(UserId).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: Uuid,
    subject_kind: String,
    subject_id: Uuid,
    content: String,
    read: bool,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn try_into_notification(self) -> Result<Notification> {
        let subject = match self.subject_kind.as_str() {
            "task" => Subject::Task(EntryId(self.subject_id)),
            "project" => Subject::Project(ProjectId(self.subject_id)),
            other => {
                return Err(Error::Other(format!("unknown notification subject: {other}")));
            }
        };
        Ok(Notification {
            id: NotificationId(self.id),
            recipient: UserId(self.recipient_id),
            subject,
            content: self.content,
            read: self.read,
            created_at: self.created_at,
        })
    }
}
