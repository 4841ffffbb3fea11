//! Integration tests for the tracker over the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use shopflow::error::Error;
use shopflow::event::{EventKind, Topic};
use shopflow::fanout::{Hub, RecipientScope};
use shopflow::model::*;
use shopflow::queue::{Cascade, Placement};
use shopflow::registry::{DepartmentRegistry, DepartmentSpec};
use shopflow::store::{MemoryStore, QueueStore};
use shopflow::tracker::Tracker;
use shopflow::view::DepartmentFilter;

struct Shop {
    tracker: Tracker<MemoryStore, Hub>,
    store: Arc<MemoryStore>,
    hub: Arc<Hub>,
    departments: Vec<DepartmentId>,
    manager: UserId,
    worker: UserId,
    project: ProjectId,
    file: FileId,
}

impl Shop {
    fn dept(&self, order: usize) -> DepartmentId {
        self.departments[order - 1]
    }

    fn key(&self, order: usize) -> EntryKey {
        EntryKey::new(self.file, self.dept(order))
    }

    async fn entry(&self, order: usize) -> QueueEntry {
        let view = self.tracker.file_view(self.file).await.unwrap();
        view.entry(self.dept(order))
            .expect("entry should exist")
            .entry
            .clone()
    }

    fn new_file(&self, name: &str) -> FileId {
        self.store
            .add_file(self.project, name, Destiny::Production)
            .unwrap()
    }
}

fn shop_with(scope: RecipientScope) -> Shop {
    let registry = DepartmentRegistry::from_specs(
        ["Design", "Engineering", "Cutting", "Assembly"]
            .iter()
            .enumerate()
            .map(|(i, name)| DepartmentSpec {
                name: name.to_string(),
                order: i as i32 + 1,
            })
            .collect(),
    )
    .unwrap();
    let departments = registry
        .departments_sorted()
        .iter()
        .map(|d| d.id)
        .collect();

    let store = Arc::new(MemoryStore::new());
    let manager = store.add_user(User::new("manager").staff());
    let worker = store.add_user(User::new("worker"));
    let project = store.add_project(Project::new("P-100", manager));
    let file = store
        .add_file(project, "frame.dwg", Destiny::Production)
        .unwrap();

    let hub = Arc::new(Hub::default());
    let tracker = Tracker::new(Arc::clone(&store), Arc::clone(&hub), registry, scope);

    Shop {
        tracker,
        store,
        hub,
        departments,
        manager,
        worker,
        project,
        file,
    }
}

fn shop() -> Shop {
    shop_with(RecipientScope::AllUsers)
}

// ---------------------------------------------------------------------------
// Chain scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_entry_is_permitted() {
    let shop = shop();

    let created = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();

    assert_eq!(created.change, Placement::First);
    assert!(created.entry.permission);
    assert!(!created.file.file.new, "first entry clears the new badge");
}

#[tokio::test]
async fn tail_waits_for_unfinished_predecessor() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();

    let created = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(2)))
        .await
        .unwrap();

    assert_eq!(created.change, Placement::Tail);
    assert!(!created.entry.permission);
    assert!(shop.entry(1).await.permission);
}

#[tokio::test]
async fn ending_hands_permission_down_and_reverting_resets_downstream() {
    let shop = shop();
    for order in [1, 2, 3] {
        shop.tracker
            .create_entry(NewEntry::new(shop.file, shop.dept(order)))
            .await
            .unwrap();
    }

    let advanced = shop
        .tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();
    assert_eq!(advanced.change, Cascade::Granted(shop.dept(2)));
    assert!(advanced.entry.end);
    assert!(advanced.entry.ended_at.is_some());
    assert!(shop.entry(2).await.permission);

    shop.tracker
        .update_entry(shop.key(2), EntryUpdate::new().start(true))
        .await
        .unwrap();
    assert_eq!(shop.entry(2).await.state(), EntryState::Started);

    let reverted = shop
        .tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(false))
        .await
        .unwrap();
    assert_eq!(
        reverted.change,
        Cascade::Reset(vec![shop.dept(2), shop.dept(3)])
    );

    let d2 = shop.entry(2).await;
    assert!(!d2.permission && !d2.start && !d2.paused && !d2.end);
    assert!(d2.started_at.is_none());
    assert!(shop.entry(1).await.permission, "reverted entry keeps its gate");
}

#[tokio::test]
async fn deleting_the_head_promotes_the_next_entry() {
    let shop = shop();
    for order in [1, 2] {
        shop.tracker
            .create_entry(NewEntry::new(shop.file, shop.dept(order)))
            .await
            .unwrap();
    }

    let deleted = shop.tracker.delete_entry(shop.key(1)).await.unwrap();

    assert_eq!(deleted.change, Some(shop.dept(2)));
    assert!(shop.entry(2).await.permission);
    assert_eq!(deleted.file.queue.len(), 1);
}

#[tokio::test]
async fn deleting_a_waiting_entry_grants_nothing() {
    let shop = shop();
    for order in [1, 2, 3] {
        shop.tracker
            .create_entry(NewEntry::new(shop.file, shop.dept(order)))
            .await
            .unwrap();
    }

    let deleted = shop.tracker.delete_entry(shop.key(2)).await.unwrap();

    assert_eq!(deleted.change, None);
    assert!(shop.entry(1).await.permission);
    assert!(!shop.entry(3).await.permission);
}

#[tokio::test]
async fn deleting_the_sole_entry_is_benign() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();

    let deleted = shop.tracker.delete_entry(shop.key(1)).await.unwrap();

    assert_eq!(deleted.change, None);
    assert!(deleted.file.queue.is_empty());
    assert_eq!(deleted.progress.total, 0);
}

#[tokio::test]
async fn ending_the_last_entry_grants_nothing() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();

    let updated = shop
        .tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();

    assert_eq!(updated.change, Cascade::None);
}

#[tokio::test]
async fn head_insert_takes_permission_from_everyone() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(2)))
        .await
        .unwrap();

    let created = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();

    assert_eq!(created.change, Placement::Head);
    assert!(created.entry.permission);
    assert!(!shop.entry(2).await.permission);
}

#[tokio::test]
async fn middle_insert_resets_only_the_next_entry() {
    let shop = shop();
    for order in [1, 3, 4] {
        shop.tracker
            .create_entry(NewEntry::new(shop.file, shop.dept(order)))
            .await
            .unwrap();
    }
    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();
    shop.tracker
        .update_entry(shop.key(3), EntryUpdate::new().start(true))
        .await
        .unwrap();

    let created = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(2)))
        .await
        .unwrap();

    assert_eq!(created.change, Placement::Middle);
    assert!(created.entry.permission, "predecessor already ended");
    let d3 = shop.entry(3).await;
    assert!(!d3.permission && !d3.start);
    assert!(shop.entry(1).await.end, "upstream is untouched");
}

#[tokio::test]
async fn every_insertion_order_converges_to_one_holder() {
    let shop = shop();
    let permutations = [
        [1, 2, 3],
        [1, 3, 2],
        [2, 1, 3],
        [2, 3, 1],
        [3, 1, 2],
        [3, 2, 1],
    ];

    for (i, order) in permutations.iter().enumerate() {
        let file = shop.new_file(&format!("perm-{i}.dwg"));
        for &o in order {
            shop.tracker
                .create_entry(NewEntry::new(file, shop.dept(o)))
                .await
                .unwrap();
        }
        let view = shop.tracker.file_view(file).await.unwrap();
        let holders: Vec<DepartmentId> = view
            .queue
            .iter()
            .filter(|e| e.entry.permission)
            .map(|e| e.entry.department_id)
            .collect();
        assert_eq!(holders, vec![shop.dept(1)], "insertion order {order:?}");
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_create_is_rejected_and_changes_nothing() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();
    let before = shop.tracker.file_view(shop.file).await.unwrap();

    let err = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateQueueEntry { .. }), "got {err:?}");
    assert!(err.is_validation());
    assert_eq!(shop.tracker.file_view(shop.file).await.unwrap(), before);
}

#[tokio::test]
async fn lifecycle_change_without_permission_is_rejected() {
    let shop = shop();
    for order in [1, 2] {
        shop.tracker
            .create_entry(NewEntry::new(shop.file, shop.dept(order)))
            .await
            .unwrap();
    }

    let err = shop
        .tracker
        .update_entry(shop.key(2), EntryUpdate::new().start(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotPermitted(_)), "got {err:?}");
    assert!(!shop.entry(2).await.start);

    // Scheduling is always allowed.
    let start = Utc::now();
    shop.tracker
        .update_entry(
            shop.key(2),
            EntryUpdate::new().planned(Some(start), Some(start + Duration::hours(2))),
        )
        .await
        .unwrap();
    assert_eq!(shop.entry(2).await.planned_start, Some(start));
}

#[tokio::test]
async fn unknown_department_and_file_are_not_found() {
    let shop = shop();

    let err = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, DepartmentId::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DepartmentNotFound(_)), "got {err:?}");

    let err = shop
        .tracker
        .create_entry(NewEntry::new(FileId::new(), shop.dept(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FileNotFound(_)), "got {err:?}");

    let err = shop.tracker.delete_entry(shop.key(1)).await.unwrap_err();
    assert!(matches!(err, Error::EntryNotFound(_)), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_keep_a_single_holder() {
    let shop = Arc::new(shop());

    let handles: Vec<_> = [4, 2, 3, 1]
        .into_iter()
        .map(|order| {
            let shop = Arc::clone(&shop);
            tokio::spawn(async move {
                shop.tracker
                    .create_entry(NewEntry::new(shop.file, shop.dept(order)))
                    .await
                    .map(|_| ())
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let view = shop.tracker.file_view(shop.file).await.unwrap();
    assert_eq!(view.queue.len(), 4);
    let holders = view
        .queue
        .iter()
        .filter(|e| e.entry.permission && !e.entry.end)
        .count();
    assert_eq!(holders, 1);
    assert!(view.entry(shop.dept(1)).unwrap().entry.permission);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_admit_exactly_one() {
    let shop = Arc::new(shop());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let shop = Arc::clone(&shop);
            tokio::spawn(async move {
                shop.tracker
                    .create_entry(NewEntry::new(shop.file, shop.dept(2)))
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => created += 1,
            Err(Error::DuplicateQueueEntry { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_creates_advances_and_deletes_stay_consistent() {
    let shop = Arc::new(shop());
    let files: Vec<FileId> = (0..12)
        .map(|i| shop.new_file(&format!("part-{i}.dwg")))
        .collect();

    let mut handles = Vec::new();
    for &file in &files {
        for step in 0..8 {
            let shop = Arc::clone(&shop);
            handles.push(tokio::spawn(async move {
                let key = |order| EntryKey::new(file, shop.dept(order));
                match step {
                    0 | 1 | 2 | 3 => shop
                        .tracker
                        .create_entry(NewEntry::new(file, shop.dept(4 - step)))
                        .await
                        .map(|_| ()),
                    4 => shop
                        .tracker
                        .update_entry(key(1), EntryUpdate::new().end(true))
                        .await
                        .map(|_| ()),
                    5 => shop
                        .tracker
                        .update_entry(key(2), EntryUpdate::new().end(true))
                        .await
                        .map(|_| ()),
                    6 => shop.tracker.delete_entry(key(3)).await.map(|_| ()),
                    _ => shop
                        .tracker
                        .update_entry(key(1), EntryUpdate::new().end(false))
                        .await
                        .map(|_| ()),
                }
            }));
        }
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) | Err(Error::EntryNotFound(_)) | Err(Error::NotPermitted(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let (mut total, mut done) = (0u64, 0u64);
    for &file in &files {
        let snapshot = shop.store.file_snapshot(file).await.unwrap();
        assert!(
            snapshot.queue.active_holders() <= 1,
            "file {file} has {} holders",
            snapshot.queue.active_holders()
        );
        total += snapshot.queue.entries().len() as u64;
        done += snapshot.queue.entries().iter().filter(|e| e.end).count() as u64;
    }

    let stored = shop.store.file_snapshot(files[0]).await.unwrap().project;
    let (project, progress) = shop
        .tracker
        .recompute_project_progress(shop.project)
        .await
        .unwrap();
    assert_eq!((progress.total, progress.done), (total, done));
    assert_eq!(project.progress, stored.progress);
}

// ---------------------------------------------------------------------------
// Progress and availability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn half_finished_project_is_started() {
    let shop = shop();
    let other = shop.new_file("panel.dwg");
    for file in [shop.file, other] {
        for order in [1, 2] {
            shop.tracker
                .create_entry(NewEntry::new(file, shop.dept(order)))
                .await
                .unwrap();
        }
    }
    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();
    let updated = shop
        .tracker
        .update_entry(shop.key(2), EntryUpdate::new().end(true))
        .await
        .unwrap();

    assert_eq!(updated.progress.total, 4);
    assert_eq!(updated.progress.done, 2);
    assert_eq!(updated.project.progress, 50);
    assert_eq!(updated.project.status, ProjectStatus::Started);
}

#[tokio::test]
async fn progress_recompute_is_idempotent_and_safe_when_empty() {
    let shop = shop();

    let (project, progress) = shop
        .tracker
        .recompute_project_progress(shop.project)
        .await
        .unwrap();
    assert_eq!(progress.percent, 0);
    assert_eq!(project.status, ProjectStatus::InDesign);

    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();
    let first = shop
        .tracker
        .recompute_project_progress(shop.project)
        .await
        .unwrap();
    let second = shop
        .tracker
        .recompute_project_progress(shop.project)
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn status_never_regresses_after_completion() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();

    let done = shop
        .tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();
    assert_eq!(done.project.progress, 100);
    assert_eq!(done.project.status, ProjectStatus::Completed);

    let reverted = shop
        .tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(false))
        .await
        .unwrap();
    assert_eq!(reverted.project.progress, 0);
    assert_eq!(reverted.project.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn assigned_user_is_busy_during_the_planned_window() {
    let shop = shop();
    let now = Utc::now();

    shop.tracker
        .create_entry(
            NewEntry::new(shop.file, shop.dept(1))
                .user(shop.worker)
                .planned(now - Duration::hours(1), now + Duration::hours(1)),
        )
        .await
        .unwrap();
    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Busy);
    assert_eq!(shop.store.user(shop.manager).unwrap().status, UserStatus::Free);

    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();
    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Free);
}

#[tokio::test]
async fn unassigned_user_is_freed() {
    let shop = shop();
    let now = Utc::now();
    shop.tracker
        .create_entry(
            NewEntry::new(shop.file, shop.dept(1))
                .user(shop.worker)
                .planned(now - Duration::hours(1), now + Duration::hours(1)),
        )
        .await
        .unwrap();

    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().users([shop.manager]))
        .await
        .unwrap();

    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Free);
    assert_eq!(shop.store.user(shop.manager).unwrap().status, UserStatus::Busy);
}

#[tokio::test]
async fn reverting_upstream_makes_downstream_users_busy_again() {
    let shop = shop();
    let now = Utc::now();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();
    shop.tracker
        .create_entry(
            NewEntry::new(shop.file, shop.dept(2))
                .user(shop.worker)
                .planned(now - Duration::hours(1), now + Duration::hours(1)),
        )
        .await
        .unwrap();
    for order in [1, 2] {
        shop.tracker
            .update_entry(shop.key(order), EntryUpdate::new().end(true))
            .await
            .unwrap();
    }
    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Free);

    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(false))
        .await
        .unwrap();

    assert!(!shop.entry(2).await.end);
    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Busy);
}

#[tokio::test]
async fn middle_insert_makes_the_reset_entry_users_busy_again() {
    let shop = shop();
    let now = Utc::now();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap();
    shop.tracker
        .create_entry(
            NewEntry::new(shop.file, shop.dept(3))
                .user(shop.worker)
                .planned(now - Duration::hours(1), now + Duration::hours(1)),
        )
        .await
        .unwrap();
    for order in [1, 3] {
        shop.tracker
            .update_entry(shop.key(order), EntryUpdate::new().end(true))
            .await
            .unwrap();
    }
    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Free);

    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(2)))
        .await
        .unwrap();

    assert!(!shop.entry(3).await.end);
    assert_eq!(shop.store.user(shop.worker).unwrap().status, UserStatus::Busy);
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_view_links_neighbouring_departments() {
    let shop = shop();
    for order in [1, 3, 4] {
        shop.tracker
            .create_entry(NewEntry::new(shop.file, shop.dept(order)))
            .await
            .unwrap();
    }
    shop.store
        .add_comment(shop.file, shop.manager, "check the welds")
        .unwrap();

    let view = shop.tracker.file_view(shop.file).await.unwrap();

    let middle = view.entry(shop.dept(3)).unwrap();
    assert_eq!(middle.department, "Cutting");
    assert_eq!(middle.previous_department, Some(shop.dept(1)));
    assert_eq!(middle.next_department, Some(shop.dept(4)));
    assert_eq!(view.project.number, "P-100");
    assert_eq!(view.comments.len(), 1);
}

#[tokio::test]
async fn department_view_splits_active_and_completed() {
    let shop = shop();
    let other = shop.new_file("panel.dwg");
    for file in [shop.file, other] {
        for order in [1, 2] {
            shop.tracker
                .create_entry(NewEntry::new(file, shop.dept(order)))
                .await
                .unwrap();
        }
    }
    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();

    let active = shop
        .tracker
        .department_view(shop.dept(1), DepartmentFilter::Active)
        .await
        .unwrap();
    let completed = shop
        .tracker
        .department_view(shop.dept(1), DepartmentFilter::Completed)
        .await
        .unwrap();

    assert_eq!(active.len(), 1);
    assert_eq!(active[0].file.id, other);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].file.id, shop.file);
    assert_eq!(completed[0].queue.len(), 1, "only the department's own entry");
}

#[tokio::test]
async fn department_load_counts_entries_per_department() {
    let shop = shop();
    let other = shop.new_file("panel.dwg");
    for (file, order) in [(shop.file, 1), (shop.file, 2), (other, 1)] {
        shop.tracker
            .create_entry(NewEntry::new(file, shop.dept(order)))
            .await
            .unwrap();
    }
    shop.tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();

    let load = shop.tracker.department_load().await.unwrap();

    assert_eq!(load.len(), 4);
    assert_eq!(load[0].department, "Design");
    assert_eq!((load[0].quantity, load[0].active), (2, 1));
    assert_eq!((load[1].quantity, load[1].active), (1, 1));
    assert_eq!(load[3].quantity, 0);
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_creation_notifies_every_user() {
    let shop = shop();
    let mut tasks = shop.hub.subscribe(Topic::Tasks(shop.worker), 16);

    let created = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)).user(shop.worker))
        .await
        .unwrap();
    let report = created.fanout.await.unwrap();

    assert_eq!(report.notifications, 2);
    // Two task notices, then per user: progress plus two view updates.
    assert_eq!(report.published, 2 + 2 * 3);
    assert_eq!(report.failed, 0);

    let envelope = tasks.try_recv().expect("task notice");
    match envelope.event {
        EventKind::TaskCreated { notification } => {
            assert_eq!(notification.recipient, shop.worker);
            assert_eq!(notification.subject, Subject::Task(created.entry.id));
        }
        other => panic!("expected TaskCreated, got {other:?}"),
    }
    assert!(tasks.try_recv().is_none());

    let stored = shop.tracker.notifications(shop.worker, true).await.unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn assigned_scope_notifies_only_assignees() {
    let shop = shop_with(RecipientScope::Assigned);

    let created = shop
        .tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)).user(shop.worker))
        .await
        .unwrap();
    let report = created.fanout.await.unwrap();

    assert_eq!(report.notifications, 1);
    assert!(
        shop.tracker
            .notifications(shop.manager, false)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn updates_refresh_open_views() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap()
        .fanout
        .await
        .unwrap();

    let mut projects = shop.hub.subscribe(Topic::Projects(shop.manager), 16);
    let mut project_view = shop.hub.subscribe(Topic::ProjectView(shop.manager), 16);

    let updated = shop
        .tracker
        .update_entry(shop.key(1), EntryUpdate::new().end(true))
        .await
        .unwrap();
    let report = updated.fanout.await.unwrap();
    assert_eq!(report.notifications, 0);

    match projects.try_recv().expect("progress").event {
        EventKind::ProjectProgress {
            project_id,
            progress,
            status,
        } => {
            assert_eq!(project_id, shop.project);
            assert_eq!(progress, 100);
            assert_eq!(status, ProjectStatus::Completed);
        }
        other => panic!("expected ProjectProgress, got {other:?}"),
    }
    match project_view.try_recv().expect("view").event {
        EventKind::FileChanged { file } => {
            assert!(file.entry(shop.dept(1)).unwrap().entry.end);
        }
        other => panic!("expected FileChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn deletion_tells_department_views_to_drop_the_task() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap()
        .fanout
        .await
        .unwrap();
    let mut dept_view = shop.hub.subscribe(Topic::DepartmentView(shop.worker), 16);

    let deleted = shop.tracker.delete_entry(shop.key(1)).await.unwrap();
    deleted.fanout.await.unwrap();

    let mut kinds = HashSet::new();
    while let Some(envelope) = dept_view.try_recv() {
        if let EventKind::TaskRemoved {
            file_id,
            department_id,
        } = &envelope.event
        {
            assert_eq!(*file_id, shop.file);
            assert_eq!(*department_id, shop.dept(1));
        }
        kinds.insert(envelope.event.name());
    }
    assert_eq!(kinds, HashSet::from(["task_removed", "file_changed"]));
}

#[tokio::test]
async fn notifications_can_be_marked_read() {
    let shop = shop();
    shop.tracker
        .create_entry(NewEntry::new(shop.file, shop.dept(1)))
        .await
        .unwrap()
        .fanout
        .await
        .unwrap();

    let unread = shop.tracker.notifications(shop.worker, true).await.unwrap();
    assert_eq!(unread.len(), 1);

    let read = shop
        .tracker
        .mark_notification_read(unread[0].id)
        .await
        .unwrap();
    assert!(read.read);
    assert!(
        shop.tracker
            .notifications(shop.worker, true)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        shop.tracker.notifications(shop.worker, false).await.unwrap().len(),
        1
    );

    let err = shop
        .tracker
        .mark_notification_read(NotificationId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotificationNotFound(_)));
}

#[tokio::test]
async fn store_reports_audience() {
    let shop = shop();
    let users = shop.store.user_ids().await.unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.contains(&shop.manager) && users.contains(&shop.worker));
}
