//! Sequential-permission state machine over one file's queue.
//!
//! A file's queue holds one entry per department it is routed through,
//! ordered by department order. Work is handed down the chain: a department
//! only gets permission once the one before it has ended. Everything here is
//! pure; stores load a [`FileQueue`], let it mutate itself, and persist the
//! [`QueueDiff`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{DepartmentId, EntryKey, EntryUpdate, File, QueueEntry};

/// Where a new entry landed in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The queue was empty.
    First,
    /// Lowest order: jumps the queue and takes permission.
    Head,
    /// Highest order: permitted only if its predecessor already ended.
    Tail,
    /// Between two entries: the next entry loses its progress.
    Middle,
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Placement::First => "first",
            Placement::Head => "head",
            Placement::Tail => "tail",
            Placement::Middle => "middle",
        };
        write!(f, "{s}")
    }
}

/// Effect of an update on the rest of the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "departments", rename_all = "snake_case")]
pub enum Cascade {
    None,
    /// The next department was handed permission.
    Granted(DepartmentId),
    /// Downstream departments were reset, nearest first.
    Reset(Vec<DepartmentId>),
}

/// Result of removing an entry.
#[derive(Debug, Clone)]
pub struct Removal {
    pub removed: QueueEntry,
    /// Department that inherited permission, if any.
    pub granted: Option<DepartmentId>,
}

/// Previous and next department of an entry within its file's chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Neighbours {
    pub previous: Option<DepartmentId>,
    pub next: Option<DepartmentId>,
}

/// Entries to write after a mutation.
#[derive(Debug, Clone, Default)]
pub struct QueueDiff {
    pub inserted: Vec<QueueEntry>,
    pub updated: Vec<QueueEntry>,
    pub removed: Vec<QueueEntry>,
}

impl QueueDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// A file together with its queue, sorted by department order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQueue {
    file: File,
    entries: Vec<QueueEntry>,
}

impl FileQueue {
    pub fn new(file: File, mut entries: Vec<QueueEntry>) -> Self {
        entries.sort_by_key(|e| e.department_order);
        Self { file, entries }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn into_parts(self) -> (File, Vec<QueueEntry>) {
        (self.file, self.entries)
    }

    pub fn get(&self, department: DepartmentId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.department_id == department)
    }

    fn position(&self, department: DepartmentId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.department_id == department)
    }

    fn key(&self, department: DepartmentId) -> EntryKey {
        EntryKey::new(self.file.id, department)
    }

    /// The entry currently allowed to work: the lowest-order entry that
    /// holds permission and has not ended.
    pub fn holder(&self) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.permission && !e.end)
    }

    /// Number of unfinished entries holding permission. Sequential hand-off
    /// keeps this at most one.
    pub fn active_holders(&self) -> usize {
        self.entries.iter().filter(|e| e.permission && !e.end).count()
    }

    pub fn neighbours(&self, department: DepartmentId) -> Neighbours {
        let Some(idx) = self.position(department) else {
            return Neighbours::default();
        };
        Neighbours {
            previous: idx
                .checked_sub(1)
                .and_then(|i| self.entries.get(i))
                .map(|e| e.department_id),
            next: self.entries.get(idx + 1).map(|e| e.department_id),
        }
    }

    /// Add a department to the chain and decide its initial permission.
    pub fn insert(&mut self, mut entry: QueueEntry, now: DateTime<Utc>) -> Result<Placement> {
        if self.position(entry.department_id).is_some() {
            return Err(Error::DuplicateQueueEntry {
                file: self.file.id,
                department: entry.department_id,
            });
        }

        let idx = self
            .entries
            .partition_point(|e| e.department_order < entry.department_order);

        let placement = if self.entries.is_empty() {
            Placement::First
        } else if idx == 0 {
            Placement::Head
        } else if idx == self.entries.len() {
            Placement::Tail
        } else {
            Placement::Middle
        };

        match placement {
            Placement::First => entry.permission = true,
            Placement::Head => {
                entry.permission = true;
                for existing in &mut self.entries {
                    if existing.permission {
                        existing.permission = false;
                        existing.updated_at = now;
                    }
                }
            }
            Placement::Tail => entry.permission = handed_down(&self.entries[idx - 1]),
            Placement::Middle => {
                entry.permission = handed_down(&self.entries[idx - 1]);
                reset(&mut self.entries[idx], now);
            }
        }

        entry.file_id = self.file.id;
        self.entries.insert(idx, entry);
        self.file.new = false;
        Ok(placement)
    }

    /// Apply an update to one entry, then advance or revert the chain when
    /// `end` was set.
    pub fn update(
        &mut self,
        department: DepartmentId,
        update: &EntryUpdate,
        now: DateTime<Utc>,
    ) -> Result<Cascade> {
        let key = self.key(department);
        let idx = self
            .position(department)
            .ok_or(Error::EntryNotFound(key))?;

        if update.changes_lifecycle() && !self.entries[idx].permission {
            return Err(Error::NotPermitted(key));
        }

        let entry = &mut self.entries[idx];
        if let Some(start) = update.start {
            entry.start = start;
            if start && entry.started_at.is_none() {
                entry.started_at = Some(now);
            }
        }
        if let Some(paused) = update.paused {
            entry.paused = paused;
            entry.paused_at = paused.then_some(now);
        }
        if let Some(end) = update.end {
            entry.end = end;
            entry.ended_at = if end { entry.ended_at.or(Some(now)) } else { None };
        }
        if let Some(planned_start) = update.planned_start {
            entry.planned_start = planned_start;
        }
        if let Some(planned_end) = update.planned_end {
            entry.planned_end = planned_end;
        }
        if let Some(ref users) = update.users {
            entry.users = users.clone();
        }
        entry.updated_at = now;

        let cascade = match update.end {
            Some(true) => match self.entries.get_mut(idx + 1) {
                Some(next) => {
                    if !next.permission {
                        next.permission = true;
                        next.updated_at = now;
                    }
                    Cascade::Granted(next.department_id)
                }
                // Last department: nothing further to hand off.
                None => Cascade::None,
            },
            Some(false) => {
                let downstream: Vec<DepartmentId> = self.entries[idx + 1..]
                    .iter_mut()
                    .map(|e| {
                        reset(e, now);
                        e.department_id
                    })
                    .collect();
                if downstream.is_empty() {
                    Cascade::None
                } else {
                    Cascade::Reset(downstream)
                }
            }
            None => Cascade::None,
        };

        Ok(cascade)
    }

    /// Take a department out of the chain and repair permission downstream.
    pub fn remove(&mut self, department: DepartmentId, now: DateTime<Utc>) -> Result<Removal> {
        let idx = self
            .position(department)
            .ok_or(Error::EntryNotFound(self.key(department)))?;
        let removed = self.entries.remove(idx);

        // The new head always has a free path; a later neighbour only
        // inherits the gate the removed entry had open.
        let heir = if idx == 0 || removed.permission {
            self.entries.get_mut(idx)
        } else {
            None
        };

        let granted = heir.map(|e| {
            if !e.permission {
                e.permission = true;
                e.updated_at = now;
            }
            e.department_id
        });

        Ok(Removal { removed, granted })
    }

    /// Entries that differ from `before`.
    pub fn diff(&self, before: &[QueueEntry]) -> QueueDiff {
        let previous: HashMap<DepartmentId, &QueueEntry> =
            before.iter().map(|e| (e.department_id, e)).collect();

        let mut diff = QueueDiff::default();
        for entry in &self.entries {
            match previous.get(&entry.department_id) {
                None => diff.inserted.push(entry.clone()),
                Some(old) if *old != entry => diff.updated.push(entry.clone()),
                Some(_) => {}
            }
        }
        for old in before {
            if self.get(old.department_id).is_none() {
                diff.removed.push(old.clone());
            }
        }
        diff
    }
}

/// Whether `prev` passes permission to the entry queued right after it. An
/// ended entry that lost its permission to a head insert passes nothing.
fn handed_down(prev: &QueueEntry) -> bool {
    prev.end && prev.permission
}

/// Reset an entry, touching `updated_at` only when something changed.
fn reset(entry: &mut QueueEntry, now: DateTime<Utc>) {
    let dirty = entry.permission
        || entry.start
        || entry.paused
        || entry.end
        || entry.started_at.is_some()
        || entry.paused_at.is_some()
        || entry.ended_at.is_some();
    if dirty {
        entry.reset(now);
    }
}
