//! Read-model projections pushed to open views and returned to callers.

use serde::{Deserialize, Serialize};

use crate::model::{
    Comment, DepartmentId, EntryState, File, Project, ProjectId, QueueEntry, UserId,
};
use crate::queue::FileQueue;
use crate::registry::DepartmentRegistry;

/// Everything a store knows about one file, unprojected.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub queue: FileQueue,
    pub project: Project,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub number: String,
    pub manager: UserId,
}

/// One queue entry as shown to users, with its place in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub department: String,
    pub state: EntryState,
    pub previous_department: Option<DepartmentId>,
    pub next_department: Option<DepartmentId>,
}

/// A file with its comments, queue and owning project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileView {
    #[serde(flatten)]
    pub file: File,
    pub project: ProjectSummary,
    pub comments: Vec<Comment>,
    pub queue: Vec<EntryView>,
}

impl FileView {
    pub fn build(snapshot: &FileSnapshot, registry: &DepartmentRegistry) -> Self {
        let queue = &snapshot.queue;
        let entries = queue
            .entries()
            .iter()
            .map(|entry| {
                let neighbours = queue.neighbours(entry.department_id);
                EntryView {
                    department: registry
                        .get(entry.department_id)
                        .map(|d| d.name.clone())
                        .unwrap_or_default(),
                    state: entry.state(),
                    previous_department: neighbours.previous,
                    next_department: neighbours.next,
                    entry: entry.clone(),
                }
            })
            .collect();

        Self {
            file: queue.file().clone(),
            project: ProjectSummary {
                id: snapshot.project.id,
                number: snapshot.project.number.clone(),
                manager: snapshot.project.manager,
            },
            comments: snapshot.comments.clone(),
            queue: entries,
        }
    }

    /// Keep only the given department's entry (department views).
    pub fn only_department(mut self, department: DepartmentId) -> Self {
        self.queue.retain(|e| e.entry.department_id == department);
        self
    }

    pub fn entry(&self, department: DepartmentId) -> Option<&EntryView> {
        self.queue
            .iter()
            .find(|e| e.entry.department_id == department)
    }
}

/// Which of a department's files to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentFilter {
    /// The department's entry has not ended.
    Active,
    /// The department's entry has ended.
    Completed,
}

impl DepartmentFilter {
    pub fn ended(self) -> bool {
        self == DepartmentFilter::Completed
    }
}

impl std::str::FromStr for DepartmentFilter {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(DepartmentFilter::Active),
            "completed" => Ok(DepartmentFilter::Completed),
            other => Err(crate::error::Error::Other(format!(
                "there is no such file queue status: {other}"
            ))),
        }
    }
}
