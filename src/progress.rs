//! Project progress and user availability, derived from queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DepartmentId, Project, ProjectStatus, QueueEntry, UserStatus};

/// Completion figures for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProgress {
    /// Queue entries across all files of the project.
    pub total: u64,
    /// Entries with `end = true`.
    pub done: u64,
    /// `floor(100 * done / total)`, 0 for a project without entries.
    pub percent: u8,
}

impl ProjectProgress {
    pub fn from_counts(total: u64, done: u64) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (done.min(total) * 100 / total) as u8
        };
        Self {
            total,
            done,
            percent,
        }
    }
}

impl ProjectStatus {
    /// Status implied by `progress`, never moving backwards.
    ///
    /// Any unfinished work lifts a project in design to `Started`; full
    /// completion lifts it to `Completed`. Suspended projects are left alone.
    pub fn advance(self, progress: &ProjectProgress) -> ProjectStatus {
        if self == ProjectStatus::Suspended || progress.total == 0 {
            return self;
        }
        let implied = if progress.percent >= 100 {
            ProjectStatus::Completed
        } else {
            ProjectStatus::Started
        };
        if implied.rank() > self.rank() {
            implied
        } else {
            self
        }
    }

    fn rank(self) -> u8 {
        match self {
            ProjectStatus::InDesign => 0,
            ProjectStatus::Started => 1,
            ProjectStatus::Completed => 2,
            ProjectStatus::Suspended => 3,
        }
    }
}

/// Write fresh progress onto a project. Returns true when anything changed.
pub fn apply(project: &mut Project, progress: &ProjectProgress) -> bool {
    let status = project.status.advance(progress);
    let changed = project.progress != progress.percent || project.status != status;
    project.progress = progress.percent;
    project.status = status;
    changed
}

/// A user is busy when one of their unfinished tasks is planned for `now`.
pub fn busy_status<'a>(
    entries: impl IntoIterator<Item = &'a QueueEntry>,
    now: DateTime<Utc>,
) -> UserStatus {
    let busy = entries
        .into_iter()
        .any(|e| !e.end && e.planned_window_contains(now));
    if busy {
        UserStatus::Busy
    } else {
        UserStatus::Free
    }
}

/// How many queue entries a department carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentLoad {
    pub department_id: DepartmentId,
    pub department: String,
    pub quantity: u64,
    /// Entries not yet ended.
    pub active: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileId, NewEntry, UserId};
    use chrono::Duration;

    #[test]
    fn half_done_project_is_started() {
        let progress = ProjectProgress::from_counts(4, 2);
        assert_eq!(progress.percent, 50);
        assert_eq!(
            ProjectStatus::InDesign.advance(&progress),
            ProjectStatus::Started
        );
    }

    #[test]
    fn zero_entries_is_zero_percent() {
        let progress = ProjectProgress::from_counts(0, 0);
        assert_eq!(progress.percent, 0);
        assert_eq!(
            ProjectStatus::InDesign.advance(&progress),
            ProjectStatus::InDesign
        );
    }

    #[test]
    fn percent_is_floored() {
        assert_eq!(ProjectProgress::from_counts(3, 1).percent, 33);
        assert_eq!(ProjectProgress::from_counts(3, 2).percent, 66);
        assert_eq!(ProjectProgress::from_counts(3, 3).percent, 100);
    }

    #[test]
    fn full_completion_completes_project() {
        let progress = ProjectProgress::from_counts(2, 2);
        assert_eq!(
            ProjectStatus::Started.advance(&progress),
            ProjectStatus::Completed
        );
    }

    #[test]
    fn status_never_regresses() {
        let progress = ProjectProgress::from_counts(4, 1);
        assert_eq!(
            ProjectStatus::Completed.advance(&progress),
            ProjectStatus::Completed
        );
        assert_eq!(
            ProjectStatus::Suspended.advance(&ProjectProgress::from_counts(1, 1)),
            ProjectStatus::Suspended
        );
    }

    #[test]
    fn apply_is_idempotent() {
        let mut project = Project::new("P-100", UserId::new());
        let progress = ProjectProgress::from_counts(4, 2);
        assert!(apply(&mut project, &progress));
        let snapshot = project.clone();
        assert!(!apply(&mut project, &progress));
        assert_eq!(project, snapshot);
    }

    #[test]
    fn busy_only_inside_planned_window_of_unfinished_task() {
        let now = Utc::now();
        let mut entry = NewEntry::new(FileId::new(), crate::model::DepartmentId::new())
            .planned(now - Duration::hours(1), now + Duration::hours(1))
            .into_entry(1, now);

        assert_eq!(busy_status([&entry], now), UserStatus::Busy);
        assert_eq!(
            busy_status([&entry], now + Duration::hours(2)),
            UserStatus::Free
        );

        entry.end = true;
        assert_eq!(busy_status([&entry], now), UserStatus::Free);
        assert_eq!(busy_status(std::iter::empty(), now), UserStatus::Free);
    }
}
