//! Projects and their derived status.

use serde::{Deserialize, Serialize};

use super::{ProjectId, UserId};

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[serde(rename = "In design")]
    InDesign,
    Started,
    Completed,
    /// Operator hold. Never set or cleared automatically.
    Suspended,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::InDesign => "In design",
            ProjectStatus::Started => "Started",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::Suspended => "Suspended",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "In design" => Ok(ProjectStatus::InDesign),
            "Started" => Ok(ProjectStatus::Started),
            "Completed" => Ok(ProjectStatus::Completed),
            "Suspended" => Ok(ProjectStatus::Suspended),
            other => Err(crate::error::Error::Other(format!(
                "unknown project status: {other}"
            ))),
        }
    }
}

/// A customer project. `progress` and `status` are maintained by the
/// progress aggregator; everything else belongs to ordinary CRUD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub number: String,
    pub manager: UserId,
    /// Percentage of finished queue entries, 0..=100.
    pub progress: u8,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(number: impl Into<String>, manager: UserId) -> Self {
        Self {
            id: ProjectId::new(),
            number: number.into(),
            manager,
            progress: 0,
            status: ProjectStatus::InDesign,
        }
    }
}
