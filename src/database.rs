use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::backend::{
    BackendError, BackendResult, CompletionWorkflow, EarningsSource, PresenceSource, TaskSource,
};
use crate::models::{parse_timestamp, OrderRef, Priority, Task, TaskStatus, WorkerPresence, WorkerProfile};
use crate::penalty::PenaltyPolicy;

/// A worker counts as online this long after their last check-in.
pub const PRESENCE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct ConfigItem {
    pub key_name: String,
    pub value: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub worker_id: String,
    pub title: String,
    pub description: Option<String>,
    pub salary: Option<f64>,
    pub due_date: DateTime<Utc>,
    pub priority: Option<Priority>,
    pub order: Option<OrderRef>,
}

/// Local sqlite store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    penalty: PenaltyPolicy,
}

pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("WORKER_DASH_DB") {
        return PathBuf::from(path);
    }
    let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home_dir).join(".worker-dash.db")
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

impl Database {
    pub fn new() -> Result<Self> {
        Self::open(&default_db_path())
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                uuid TEXT PRIMARY KEY,
                worker_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                salary REAL,
                due_date TEXT,
                priority TEXT,
                status TEXT,
                completed_at TEXT,
                order_title TEXT,
                client_name TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                uuid_user TEXT PRIMARY KEY,
                full_name TEXT,
                email TEXT,
                role TEXT,
                avatar_url TEXT,
                salary REAL NOT NULL DEFAULT 0,
                completed_tasks INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS configs (
                key_name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
            penalty: PenaltyPolicy::default(),
        })
    }

    pub fn with_penalty(mut self, penalty: PenaltyPolicy) -> Self {
        self.penalty = penalty;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves sqlite itself consistent
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Config

    pub fn set_config(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        let now = ts(Utc::now());
        self.conn().execute(
            "INSERT INTO configs (key_name, value, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(key_name) DO UPDATE SET
                value = excluded.value,
                description = COALESCE(excluded.description, configs.description),
                updated_at = excluded.updated_at",
            params![key, value, description, now],
        )?;
        log::debug!("config {} set to {}", key, value);
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM configs WHERE key_name = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn delete_config(&self, key: &str) -> Result<bool> {
        let deleted = self.conn().execute("DELETE FROM configs WHERE key_name = ?1", [key])?;
        Ok(deleted > 0)
    }

    pub fn get_all_configs(&self) -> Result<Vec<ConfigItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key_name, value, description, created_at, updated_at FROM configs ORDER BY key_name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ConfigItem {
                key_name: row.get(0)?,
                value: row.get(1)?,
                description: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;

        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    // Workers

    /// Creates or updates a worker profile and records a check-in.
    pub fn upsert_worker(&self, profile: &WorkerProfile, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (uuid_user, full_name, email, role, avatar_url, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(uuid_user) DO UPDATE SET
                full_name = COALESCE(excluded.full_name, users.full_name),
                email = COALESCE(excluded.email, users.email),
                role = COALESCE(excluded.role, users.role),
                avatar_url = COALESCE(excluded.avatar_url, users.avatar_url),
                last_seen = excluded.last_seen",
            params![
                profile.id,
                profile.full_name,
                profile.email,
                profile.role,
                profile.avatar_url,
                ts(now)
            ],
        )?;
        Ok(())
    }

    pub fn load_presence(&self, worker_id: &str, now: DateTime<Utc>) -> BackendResult<WorkerPresence> {
        let row = self
            .conn()
            .query_row(
                "SELECT full_name, email, role, avatar_url, last_seen FROM users WHERE uuid_user = ?1",
                [worker_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let (full_name, email, role, avatar_url, last_seen) =
            row.ok_or_else(|| BackendError::NotFound(format!("worker '{}'", worker_id)))?;
        let online = last_seen
            .as_deref()
            .and_then(parse_timestamp)
            .map(|seen| now - seen <= Duration::seconds(PRESENCE_WINDOW_SECS))
            .unwrap_or(false);

        Ok(WorkerPresence {
            profile: WorkerProfile {
                id: worker_id.to_string(),
                full_name,
                email,
                role,
                avatar_url,
            },
            online,
        })
    }

    pub fn load_total_earned(&self, worker_id: &str) -> BackendResult<f64> {
        let total = self
            .conn()
            .query_row("SELECT salary FROM users WHERE uuid_user = ?1", [worker_id], |row| {
                row.get::<_, f64>(0)
            })
            .optional()?;
        total.ok_or_else(|| BackendError::NotFound(format!("worker '{}'", worker_id)))
    }

    // Tasks

    pub fn add_task(&self, task: &NewTask) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO tasks (uuid, worker_id, title, description, salary, due_date, priority,
                                status, order_title, client_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10)",
            params![
                id,
                task.worker_id,
                task.title,
                task.description,
                task.salary,
                ts(task.due_date),
                task.priority.map(|p| p.as_str()),
                task.order.as_ref().map(|o| o.title.as_str()),
                task.order.as_ref().map(|o| o.client_name.as_str()),
                ts(Utc::now()),
            ],
        )?;
        log::info!("task {} '{}' added for worker {}", id, task.title, task.worker_id);
        Ok(id)
    }

    /// Finds the task whose id equals or uniquely starts with `prefix`.
    pub fn resolve_task_id(&self, prefix: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT uuid FROM tasks WHERE uuid = ?1 OR uuid LIKE ?2 || '%' LIMIT 2")?;
        let rows = stmt.query_map([prefix, prefix], |row| row.get::<_, String>(0))?;

        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?);
        }
        if let Some(exact) = matches.iter().find(|id| id.as_str() == prefix) {
            return Ok(Some(exact.clone()));
        }
        match matches.len() {
            1 => Ok(matches.pop()),
            0 => Ok(None),
            _ => anyhow::bail!("Task id prefix '{}' is ambiguous", prefix),
        }
    }

    /// Sets a task's status. `completed` stamps `completed_at`, anything else clears it.
    pub fn update_task_status(&self, task_id: &str, status: TaskStatus, now: DateTime<Utc>) -> Result<bool> {
        let completed_at = (status == TaskStatus::Completed).then(|| ts(now));
        let updated = self.conn().execute(
            "UPDATE tasks SET status = ?1, completed_at = ?2 WHERE uuid = ?3",
            params![status.as_str(), completed_at, task_id],
        )?;
        Ok(updated > 0)
    }

    #[cfg(test)]
    pub fn load_task(&self, task_id: &str) -> BackendResult<Option<Task>> {
        let task = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM tasks WHERE uuid = ?1", TASK_COLUMNS),
                [task_id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    pub fn load_tasks(&self, worker_id: &str) -> BackendResult<Vec<Task>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE worker_id = ?1 ORDER BY due_date ASC, created_at ASC",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map([worker_id], task_from_row)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Marks the task completed and credits the worker with the payout they
    /// actually earn: the discounted amount when the deadline has passed.
    pub fn complete_task_at(&self, task_id: &str, now: DateTime<Utc>) -> BackendResult<f64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT worker_id, salary, due_date, status FROM tasks WHERE uuid = ?1",
                [task_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        let (worker_id, salary, due_date, status) =
            row.ok_or_else(|| BackendError::NotFound(format!("task '{}'", task_id)))?;

        if status.as_deref() == Some(TaskStatus::Completed.as_str()) {
            return Err(BackendError::Rejected(format!("task '{}' is already completed", task_id)));
        }

        let overdue = due_date
            .as_deref()
            .and_then(parse_timestamp)
            .map(|due| due <= now)
            .unwrap_or(false);
        let payout = self.penalty.apply(salary.unwrap_or(0.0), overdue);

        tx.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?1 WHERE uuid = ?2",
            params![ts(now), task_id],
        )?;
        tx.execute(
            "INSERT INTO users (uuid_user, salary, completed_tasks) VALUES (?1, ?2, 1)
             ON CONFLICT(uuid_user) DO UPDATE SET
                salary = users.salary + excluded.salary,
                completed_tasks = users.completed_tasks + 1",
            params![worker_id, payout],
        )?;
        tx.commit()?;

        log::info!("task {} completed, credited {:.2}", task_id, payout);
        Ok(payout)
    }

    /// Bumps whenever another connection commits a change.
    pub fn data_version(&self) -> BackendResult<i64> {
        let version = self
            .conn()
            .query_row("PRAGMA data_version", [], |row| row.get(0))?;
        Ok(version)
    }
}

const TASK_COLUMNS: &str =
    "uuid, title, description, salary, due_date, priority, status, completed_at, order_title, client_name";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let due_raw: Option<String> = row.get(4)?;
    let priority_raw: Option<String> = row.get(5)?;
    let status_raw: Option<String> = row.get(6)?;
    let completed_raw: Option<String> = row.get(7)?;
    let order_title: Option<String> = row.get(8)?;
    let client_name: Option<String> = row.get(9)?;

    let due_date = due_raw.as_deref().and_then(parse_timestamp);
    if due_date.is_none() {
        log::warn!("task {} has no usable due date ({:?})", id, due_raw);
    }

    Ok(Task {
        title: row.get(1)?,
        description: row.get(2)?,
        salary: row.get(3)?,
        due_date,
        priority: priority_raw.as_deref().and_then(Priority::parse),
        status: status_raw.as_deref().and_then(TaskStatus::parse),
        completed_at: completed_raw.as_deref().and_then(parse_timestamp),
        order: order_title.map(|title| OrderRef {
            title,
            client_name: client_name.unwrap_or_default(),
        }),
        id,
    })
}

impl TaskSource for Database {
    async fn fetch_tasks(&self, worker_id: &str) -> BackendResult<Vec<Task>> {
        self.load_tasks(worker_id)
    }
}

impl EarningsSource for Database {
    async fn fetch_total_earned(&self, worker_id: &str) -> BackendResult<f64> {
        self.load_total_earned(worker_id)
    }
}

impl PresenceSource for Database {
    async fn fetch_presence(&self, worker_id: &str) -> BackendResult<WorkerPresence> {
        self.load_presence(worker_id, Utc::now())
    }
}

impl CompletionWorkflow for Database {
    async fn complete_task(&self, task: &Task) -> BackendResult<()> {
        self.complete_task_at(&task.id, Utc::now()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn new_task(worker: &str, title: &str, due_offset: i64, salary: Option<f64>) -> NewTask {
        NewTask {
            worker_id: worker.to_string(),
            title: title.to_string(),
            salary,
            due_date: now() + Duration::seconds(due_offset),
            ..Default::default()
        }
    }

    #[test]
    fn config_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_config("timezone").unwrap(), None);
        db.set_config("timezone", "UTC", Some("Reference timezone")).unwrap();
        db.set_config("timezone", "Europe/Berlin", None).unwrap();
        assert_eq!(db.get_config("timezone").unwrap().as_deref(), Some("Europe/Berlin"));

        let configs = db.get_all_configs().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].description.as_deref(), Some("Reference timezone"));

        assert!(db.delete_config("timezone").unwrap());
        assert!(!db.delete_config("timezone").unwrap());
    }

    #[test]
    fn tasks_come_back_in_deadline_order_per_worker() {
        let db = Database::open_in_memory().unwrap();
        db.add_task(&new_task("w1", "later", 7200, Some(10.0))).unwrap();
        db.add_task(&new_task("w1", "sooner", 60, None)).unwrap();
        db.add_task(&new_task("w2", "someone else", 0, None)).unwrap();

        let tasks = db.load_tasks("w1").unwrap();
        let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["sooner", "later"]);
        assert_eq!(tasks[0].status, Some(TaskStatus::Pending));
        assert_eq!(tasks[1].salary, Some(10.0));
    }

    #[test]
    fn malformed_due_date_stays_local_to_its_row() {
        let db = Database::open_in_memory().unwrap();
        db.add_task(&new_task("w1", "fine", 60, None)).unwrap();
        db.conn()
            .execute(
                "INSERT INTO tasks (uuid, worker_id, title, due_date, status, created_at)
                 VALUES ('bad', 'w1', 'broken', 'not a date', 'weird', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();

        let tasks = db.load_tasks("w1").unwrap();
        assert_eq!(tasks.len(), 2);
        let broken = tasks.iter().find(|t| t.id == "bad").unwrap();
        assert_eq!(broken.due_date, None);
        assert_eq!(broken.status, None);
    }

    #[test]
    fn status_update_stamps_and_clears_completion() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add_task(&new_task("w1", "t", 60, None)).unwrap();

        assert!(db.update_task_status(&id, TaskStatus::Completed, now()).unwrap());
        let task = db.load_task(&id).unwrap().unwrap();
        assert_eq!(task.completed_at, Some(now()));

        assert!(db.update_task_status(&id, TaskStatus::InProgress, now()).unwrap());
        let task = db.load_task(&id).unwrap().unwrap();
        assert_eq!(task.completed_at, None);
        assert_eq!(task.status, Some(TaskStatus::InProgress));

        assert!(!db.update_task_status("missing", TaskStatus::Pending, now()).unwrap());
    }

    #[test]
    fn completion_credits_discounted_payout_when_late() {
        let db = Database::open_in_memory().unwrap();
        let on_time = db.add_task(&new_task("w1", "on time", 60, Some(200.0))).unwrap();
        let late = db.add_task(&new_task("w1", "late", -10, Some(100.0))).unwrap();

        assert_eq!(db.complete_task_at(&on_time, now()).unwrap(), 200.0);
        assert!((db.complete_task_at(&late, now()).unwrap() - 90.0).abs() < 1e-9);
        assert!((db.load_total_earned("w1").unwrap() - 290.0).abs() < 1e-9);

        let again = db.complete_task_at(&late, now());
        assert!(matches!(again, Err(BackendError::Rejected(_))));
        let missing = db.complete_task_at("nope", now());
        assert!(matches!(missing, Err(BackendError::NotFound(_))));
    }

    #[test]
    fn presence_follows_last_check_in() {
        let db = Database::open_in_memory().unwrap();
        let profile = WorkerProfile {
            id: "w1".to_string(),
            full_name: Some("Anna Smirnova".to_string()),
            ..Default::default()
        };
        db.upsert_worker(&profile, now()).unwrap();

        let presence = db.load_presence("w1", now() + Duration::seconds(60)).unwrap();
        assert!(presence.online);
        assert_eq!(presence.profile.display_name(), "Anna Smirnova");

        let later = db.load_presence("w1", now() + Duration::seconds(PRESENCE_WINDOW_SECS + 1)).unwrap();
        assert!(!later.online);

        assert!(matches!(db.load_presence("ghost", now()), Err(BackendError::NotFound(_))));
        assert_eq!(db.load_total_earned("w1").unwrap(), 0.0);
    }

    #[test]
    fn task_ids_resolve_by_prefix() {
        let db = Database::open_in_memory().unwrap();
        let id = db.add_task(&new_task("w1", "t", 60, None)).unwrap();
        assert_eq!(db.resolve_task_id(&id[..8]).unwrap(), Some(id.clone()));
        assert_eq!(db.resolve_task_id(&id).unwrap(), Some(id));
        assert_eq!(db.resolve_task_id("zzzz").unwrap(), None);
    }

    #[test]
    fn data_version_moves_on_foreign_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dash.db");
        let watcher = Database::open(&path).unwrap();
        let writer = Database::open(&path).unwrap();

        let before = watcher.data_version().unwrap();
        writer.add_task(&new_task("w1", "t", 60, None)).unwrap();
        assert_ne!(watcher.data_version().unwrap(), before);
    }
}
