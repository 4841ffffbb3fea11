//! Department registry.
//!
//! The ordered list of departments every file is routed through. Loaded once
//! per deployment and never mutated while the tracker runs.

use crate::error::{Error, Result};
use crate::model::{Department, DepartmentId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct DepartmentsFile {
    #[serde(default, rename = "department")]
    departments: Vec<DepartmentSpec>,
}

/// A department as declared in configuration, before it has an identity.
#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentSpec {
    pub name: String,
    pub order: i32,
}

/// Load department declarations from a TOML file:
///
/// ```toml
/// [[department]]
/// name = "Design"
/// order = 1
/// ```
pub fn load_specs(path: &Path) -> Result<Vec<DepartmentSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read departments file {}: {e}", path.display()))
    })?;
    let file: DepartmentsFile = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("bad departments file {}: {e}", path.display())))?;
    Ok(file.departments)
}

/// Departments sorted by `order`.
#[derive(Debug, Clone, Default)]
pub struct DepartmentRegistry {
    departments: Vec<Department>,
}

impl DepartmentRegistry {
    /// Build a registry. Orders and names must be unique; gaps are fine.
    pub fn new(mut departments: Vec<Department>) -> Result<Self> {
        departments.sort_by_key(|d| d.order);

        let mut names = HashSet::new();
        for pair in departments.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(Error::Config(format!(
                    "departments {} and {} share order {}",
                    pair[0].name, pair[1].name, pair[0].order
                )));
            }
        }
        for d in &departments {
            if !names.insert(d.name.as_str()) {
                return Err(Error::Config(format!("duplicate department name {}", d.name)));
            }
        }

        Ok(Self { departments })
    }

    /// Build a registry from declarations, assigning fresh identities.
    /// Used when no database is involved.
    pub fn from_specs(specs: Vec<DepartmentSpec>) -> Result<Self> {
        Self::new(
            specs
                .into_iter()
                .map(|s| Department {
                    id: DepartmentId::new(),
                    name: s.name,
                    order: s.order,
                })
                .collect(),
        )
    }

    /// Load declarations from a TOML file and assign fresh identities.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::from_specs(load_specs(path)?)
    }

    /// All departments, first in the chain first.
    pub fn departments_sorted(&self) -> &[Department] {
        &self.departments
    }

    pub fn get(&self, id: DepartmentId) -> Option<&Department> {
        self.departments.iter().find(|d| d.id == id)
    }

    /// Look a department up, failing with `DepartmentNotFound`.
    pub fn require(&self, id: DepartmentId) -> Result<&Department> {
        self.get(id)
            .ok_or_else(|| Error::DepartmentNotFound(id.0.to_string()))
    }

    /// Find a department by full UUID or by (case-insensitive) name.
    pub fn resolve(&self, name_or_id: &str) -> Result<&Department> {
        if let Ok(id) = name_or_id.parse::<DepartmentId>()
            && let Some(d) = self.get(id)
        {
            return Ok(d);
        }
        self.departments
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name_or_id))
            .ok_or_else(|| Error::DepartmentNotFound(name_or_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.departments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }
}
