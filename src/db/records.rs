//! Departments and the plain records queues hang off: users, projects,
//! files and comments.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Comment, CommentId, Department, DepartmentId, Destiny, File, FileId, Project, ProjectId, User,
    UserId,
};
use crate::registry::{DepartmentRegistry, DepartmentSpec};

impl super::Db {
    /// Upsert departments by name and return the resulting registry.
    ///
    /// Departments missing from `specs` are left alone; their entries still
    /// reference them.
    pub async fn sync_departments(&self, specs: &[DepartmentSpec]) -> Result<DepartmentRegistry> {
        // Reject duplicate names/orders before touching the table.
        DepartmentRegistry::from_specs(specs.to_vec())?;

        let mut tx = self.pool().begin().await?;
        for spec in specs {
            sqlx::query(
                "INSERT INTO departments (id, name, sort_order) VALUES ($1, $2, $3)
                 ON CONFLICT (name) DO UPDATE SET sort_order = EXCLUDED.sort_order",
            )
            .bind(Uuid::new_v4())
            .bind(&spec.name)
            .bind(spec.order)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let registry = self.load_departments().await?;
        info!(departments = registry.len(), "departments synced");
        Ok(registry)
    }

    /// Build the registry from the departments table.
    pub async fn load_departments(&self) -> Result<DepartmentRegistry> {
        let rows: Vec<(Uuid, String, i32)> =
            sqlx::query_as("SELECT id, name, sort_order FROM departments ORDER BY sort_order")
                .fetch_all(self.pool())
                .await?;

        DepartmentRegistry::new(
            rows.into_iter()
                .map(|(id, name, order)| Department {
                    id: DepartmentId(id),
                    name,
                    order,
                })
                .collect(),
        )
    }

    pub async fn insert_user(&self, user: &User) -> Result<UserId> {
        sqlx::query("INSERT INTO users (id, name, is_staff, status) VALUES ($1, $2, $3, $4)")
            .bind(user.id.0)
            .bind(&user.name)
            .bind(user.is_staff)
            .bind(user.status.to_string())
            .execute(self.pool())
            .await?;
        Ok(user.id)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        let row: Option<(Uuid, String, bool, String)> =
            sqlx::query_as("SELECT id, name, is_staff, status FROM users WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        let (id, name, is_staff, status) = row.ok_or(Error::UserNotFound(id))?;
        Ok(User {
            id: UserId(id),
            name,
            is_staff,
            status: status.parse()?,
        })
    }

    pub async fn insert_project(&self, project: &Project) -> Result<ProjectId> {
        sqlx::query(
            "INSERT INTO projects (id, number, manager_id, progress, status) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(project.id.0)
        .bind(&project.number)
        .bind(project.manager.0)
        .bind(i16::from(project.progress))
        .bind(project.status.to_string())
        .execute(self.pool())
        .await?;
        Ok(project.id)
    }

    /// Add a file to a project. It stays `new` until its first queue entry.
    pub async fn insert_file(
        &self,
        project: ProjectId,
        name: &str,
        destiny: Destiny,
    ) -> Result<File> {
        let file = File {
            id: FileId::new(),
            project_id: project,
            name: name.to_string(),
            destiny,
            new: true,
        };
        let result = sqlx::query(
            "INSERT INTO files (id, project_id, name, destiny, new) VALUES ($1, $2, $3, $4, TRUE)",
        )
        .bind(file.id.0)
        .bind(project.0)
        .bind(&file.name)
        .bind(destiny.to_string())
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(file),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(Error::ProjectNotFound(project))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_comment(&self, file: FileId, user: UserId, text: &str) -> Result<Comment> {
        let comment = Comment {
            id: CommentId::new(),
            file_id: file,
            user,
            text: text.to_string(),
            posted_at: Utc::now(),
            read: false,
        };
        sqlx::query(
            "INSERT INTO comments (id, file_id, user_id, text, posted_at, read) VALUES ($1, $2, $3, $4, $5, FALSE)",
        )
        .bind(comment.id.0)
        .bind(file.0)
        .bind(user.0)
        .bind(&comment.text)
        .bind(comment.posted_at)
        .execute(self.pool())
        .await?;
        Ok(comment)
    }
}
