//! shopflow CLI: operator interface to the workflow tracker.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use shopflow::config::Config;
use shopflow::db::{Db, PgNotifier, PgSubscription};
use shopflow::event::Topic;
use shopflow::model::{
    EntryKey, EntryUpdate, FileId, NewEntry, NotificationId, ProjectId, UserId,
};
use shopflow::registry;
use shopflow::telemetry::init_telemetry;
use shopflow::tracker::Tracker;
use shopflow::view::{DepartmentFilter, FileView};

#[derive(Parser)]
#[command(name = "shopflow", about = "Route project files through the shop's departments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Department registry operations
    Departments {
        #[command(subcommand)]
        action: DepartmentAction,
    },
    /// File queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Project operations
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// User operations
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Notification operations
    Notifications {
        #[command(subcommand)]
        action: NotificationAction,
    },
    /// Print every event published to a user's topics
    Watch {
        /// User ID
        user: UserId,
    },
}

#[derive(Subcommand)]
enum DepartmentAction {
    /// Upsert departments from a TOML file
    Sync {
        /// Departments file (defaults to DEPARTMENTS_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List departments in chain order
    List,
    /// Files a department is working on or has finished
    View {
        /// Department name or ID
        department: String,
        /// "active" or "completed"
        #[arg(long, default_value = "active")]
        status: DepartmentFilter,
    },
    /// Queue entries per department
    Load,
}

#[derive(Subcommand)]
enum QueueAction {
    /// Add a department to a file's queue
    Add {
        file: FileId,
        /// Department name or ID
        department: String,
        /// Assigned user (repeatable)
        #[arg(long = "user")]
        users: Vec<UserId>,
        /// Planned start (RFC 3339)
        #[arg(long, requires = "planned_end")]
        planned_start: Option<DateTime<Utc>>,
        /// Planned end (RFC 3339)
        #[arg(long, requires = "planned_start")]
        planned_end: Option<DateTime<Utc>>,
    },
    /// Change a queue entry; --end advances or reverts the chain
    Update {
        file: FileId,
        /// Department name or ID
        department: String,
        #[arg(long)]
        end: Option<bool>,
        #[arg(long)]
        start: Option<bool>,
        #[arg(long)]
        paused: Option<bool>,
        /// Replace assigned users (repeatable)
        #[arg(long = "user")]
        users: Vec<UserId>,
        /// New planned start (RFC 3339)
        #[arg(long, requires = "planned_end", conflicts_with = "clear_planned")]
        planned_start: Option<DateTime<Utc>>,
        /// New planned end (RFC 3339)
        #[arg(long, requires = "planned_start", conflicts_with = "clear_planned")]
        planned_end: Option<DateTime<Utc>>,
        /// Drop the planned window
        #[arg(long)]
        clear_planned: bool,
    },
    /// Take a department out of a file's queue
    Remove {
        file: FileId,
        /// Department name or ID
        department: String,
    },
    /// Show a file with its queue
    Show { file: FileId },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Recount progress and status
    Recompute { project: ProjectId },
}

#[derive(Subcommand)]
enum UserAction {
    /// Recompute Busy/Free
    Status { user: UserId },
}

#[derive(Subcommand)]
enum NotificationAction {
    /// List a user's notifications, newest first
    List {
        user: UserId,
        #[arg(long)]
        unread: bool,
    },
    /// Mark a notification read
    Read { id: NotificationId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(config.telemetry())?;

    let db = Db::connect(&config.database_url).await?;

    match cli.command {
        Command::Migrate => {
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Departments { action } => cmd_departments(&db, &config, action).await,
        Command::Queue { action } => cmd_queue(&open_tracker(&db, &config).await?, action).await,
        Command::Project {
            action: ProjectAction::Recompute { project },
        } => {
            let tracker = open_tracker(&db, &config).await?;
            let (project, progress) = tracker.recompute_project_progress(project).await?;
            println!(
                "Project {}: {}% ({}/{} entries done), {}",
                project.number, progress.percent, progress.done, progress.total, project.status
            );
            Ok(())
        }
        Command::User {
            action: UserAction::Status { user },
        } => {
            let tracker = open_tracker(&db, &config).await?;
            let status = tracker.recompute_user_status(user).await?;
            println!("User {user}: {status}");
            Ok(())
        }
        Command::Notifications { action } => {
            cmd_notifications(&open_tracker(&db, &config).await?, action).await
        }
        Command::Watch { user } => cmd_watch(&db, user, config.dedup_window).await,
    }
}

async fn open_tracker(db: &Db, config: &Config) -> anyhow::Result<Tracker<Db, PgNotifier>> {
    let registry = db.load_departments().await?;
    Ok(Tracker::new(
        Arc::new(db.clone()),
        Arc::new(db.notifier()),
        registry,
        config.notify_scope,
    ))
}

async fn cmd_departments(db: &Db, config: &Config, action: DepartmentAction) -> anyhow::Result<()> {
    if let DepartmentAction::Sync { file } = action {
        let path = file.unwrap_or_else(|| config.departments_file.clone());
        let specs = registry::load_specs(&path)?;
        let registry = db.sync_departments(&specs).await?;
        println!("Synced {} department(s) from {}.", registry.len(), path.display());
        return Ok(());
    }

    let tracker = open_tracker(db, config).await?;
    match action {
        DepartmentAction::List => {
            println!("{:<6}  {:<24}  ID", "ORDER", "NAME");
            for d in tracker.registry().departments_sorted() {
                println!("{:<6}  {:<24}  {}", d.order, d.name, d.id.0);
            }
        }
        DepartmentAction::View { department, status } => {
            let department = tracker.registry().resolve(&department)?.id;
            let files = tracker.department_view(department, status).await?;
            if files.is_empty() {
                println!("No files.");
            }
            for file in &files {
                print_file(file);
            }
        }
        DepartmentAction::Load => {
            println!("{:<24}  {:>8}  {:>8}", "DEPARTMENT", "ENTRIES", "ACTIVE");
            for load in tracker.department_load().await? {
                println!(
                    "{:<24}  {:>8}  {:>8}",
                    load.department, load.quantity, load.active
                );
            }
        }
        DepartmentAction::Sync { .. } => {}
    }
    Ok(())
}

async fn cmd_notifications(
    tracker: &Tracker<Db, PgNotifier>,
    action: NotificationAction,
) -> anyhow::Result<()> {
    match action {
        NotificationAction::List { user, unread } => {
            let notifications = tracker.notifications(user, unread).await?;
            if notifications.is_empty() {
                println!("No notifications.");
            }
            for n in &notifications {
                println!(
                    "{}  {}  {}  {}",
                    n.id.0,
                    if n.read { "read  " } else { "unread" },
                    n.created_at.format("%Y-%m-%d %H:%M"),
                    n.content
                );
            }
        }
        NotificationAction::Read { id } => {
            let n = tracker.mark_notification_read(id).await?;
            println!("Marked read: {}", n.content);
        }
    }
    Ok(())
}

async fn cmd_queue(tracker: &Tracker<Db, PgNotifier>, action: QueueAction) -> anyhow::Result<()> {
    match action {
        QueueAction::Add {
            file,
            department,
            users,
            planned_start,
            planned_end,
        } => {
            let department = tracker.registry().resolve(&department)?.id;
            let mut new = NewEntry::new(file, department).users(users);
            if let (Some(start), Some(end)) = (planned_start, planned_end) {
                new = new.planned(start, end);
            }
            let outcome = tracker.create_entry(new).await?;
            println!(
                "Created: {} ({}, permission: {})",
                outcome.entry.key(),
                outcome.change,
                outcome.entry.permission
            );
            print_file(&outcome.file);
            report(outcome.fanout).await
        }
        QueueAction::Update {
            file,
            department,
            end,
            start,
            paused,
            users,
            planned_start,
            planned_end,
            clear_planned,
        } => {
            let department = tracker.registry().resolve(&department)?.id;
            let mut update = EntryUpdate::new();
            if clear_planned {
                update = update.planned(None, None);
            } else if let (Some(start), Some(end)) = (planned_start, planned_end) {
                update = update.planned(Some(start), Some(end));
            }
            if let Some(end) = end {
                update = update.end(end);
            }
            if let Some(start) = start {
                update = update.start(start);
            }
            if let Some(paused) = paused {
                update = update.paused(paused);
            }
            if !users.is_empty() {
                update = update.users(users);
            }
            let outcome = tracker
                .update_entry(EntryKey::new(file, department), update)
                .await?;
            println!(
                "Updated: {} ({}), cascade: {:?}",
                outcome.entry.key(),
                outcome.entry.state(),
                outcome.change
            );
            print_file(&outcome.file);
            report(outcome.fanout).await
        }
        QueueAction::Remove { file, department } => {
            let department = tracker.registry().resolve(&department)?.id;
            let outcome = tracker
                .delete_entry(EntryKey::new(file, department))
                .await?;
            match outcome.change {
                Some(heir) => println!("Removed: {} (permission passed to {heir})", outcome.entry.key()),
                None => println!("Removed: {}", outcome.entry.key()),
            }
            print_file(&outcome.file);
            report(outcome.fanout).await
        }
        QueueAction::Show { file } => {
            let view = tracker.file_view(file).await?;
            print_file(&view);
            Ok(())
        }
    }
}

async fn cmd_watch(db: &Db, user: UserId, dedup_window: usize) -> anyhow::Result<()> {
    let mut subscription = PgSubscription::listen(db, &Topic::all_for(user), dedup_window).await?;
    println!("Watching topics of user {user}. Ctrl-C to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            envelope = subscription.recv() => {
                let envelope = envelope?;
                println!("{}", serde_json::to_string(&envelope)?);
            }
        }
    }
}

/// Wait for the background fan-out so it is not cut short by exit.
async fn report(fanout: tokio::task::JoinHandle<shopflow::fanout::FanoutReport>) -> anyhow::Result<()> {
    let report = fanout.await?;
    println!(
        "Fan-out: {} notification(s), {} published, {} failed",
        report.notifications, report.published, report.failed
    );
    Ok(())
}

fn print_file(view: &FileView) {
    println!(
        "File {} \"{}\" ({}) of project {}{}",
        view.file.id.0,
        view.file.name,
        view.file.destiny,
        view.project.number,
        if view.file.new { " [new]" } else { "" }
    );
    println!(
        "  {:<20}  {:<8}  {:<10}  {:<20}  USERS",
        "DEPARTMENT", "STATE", "PERMITTED", "PLANNED END"
    );
    for e in &view.queue {
        println!(
            "  {:<20}  {:<8}  {:<10}  {:<20}  {}",
            e.department,
            e.state,
            e.entry.permission,
            e.entry
                .planned_end
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            e.entry.users.len()
        );
    }
    for c in &view.comments {
        println!("  > {}: {}", c.posted_at.format("%Y-%m-%d %H:%M"), c.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "5f0c2a4e-8d1b-4c3a-9e7f-1a2b3c4d5e6f";

    #[test]
    fn queue_update_accepts_a_planned_window() {
        let cli = Cli::try_parse_from([
            "shopflow",
            "queue",
            "update",
            FILE,
            "Cutting",
            "--planned-start",
            "2026-03-02T08:00:00Z",
            "--planned-end",
            "2026-03-04T17:00:00Z",
        ])
        .unwrap();

        let Command::Queue {
            action:
                QueueAction::Update {
                    planned_start,
                    planned_end,
                    clear_planned,
                    ..
                },
        } = cli.command
        else {
            panic!("parsed as another command");
        };
        assert!(planned_start.is_some() && planned_end.is_some());
        assert!(!clear_planned);
    }

    #[test]
    fn queue_update_rejects_half_a_window_or_a_conflicting_clear() {
        let half = Cli::try_parse_from([
            "shopflow",
            "queue",
            "update",
            FILE,
            "Cutting",
            "--planned-start",
            "2026-03-02T08:00:00Z",
        ]);
        assert!(half.is_err());

        let both = Cli::try_parse_from([
            "shopflow",
            "queue",
            "update",
            FILE,
            "Cutting",
            "--planned-start",
            "2026-03-02T08:00:00Z",
            "--planned-end",
            "2026-03-04T17:00:00Z",
            "--clear-planned",
        ]);
        assert!(both.is_err());
    }
}
