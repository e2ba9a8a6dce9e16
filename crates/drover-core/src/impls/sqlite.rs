//! SQLite-backed task store.
//!
//! All task sets live in one fixed table, `tasks`, partitioned by the
//! `task_set` column. `seq` (AUTOINCREMENT) records insertion order and keeps
//! `next_pending_batch` stable across runs.
//!
//! `TaskDatabase` owns the connection pool and the schema; task-set handles
//! are cheap clones of it.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use tracing::{debug, info};

use crate::domain::{
    StoreError, TaskId, TaskRecord, TaskSetName, TaskStatus, TaskSummary, TaskUpdate,
};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

const FILE_POOL_SIZE: u32 = 4;

const TASK_COLUMNS: &str =
    "task_id, task_set, input_data, status, retries, result, created_at, updated_at";

/// Handle to one SQLite database holding any number of task sets.
#[derive(Clone)]
pub struct TaskDatabase {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskDatabase {
    /// Open (and create if missing) the database at `url`, e.g.
    /// `sqlite://data/drover.db` or `sqlite::memory:`.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        if in_memory {
            return Self::connect(options, 1).await;
        }

        ensure_parent_dir(options.get_filename())?;
        options = options.journal_mode(SqliteJournalMode::Wal);
        Self::connect(options, FILE_POOL_SIZE).await
    }

    /// Private in-memory database. Gone once the handle and its clones drop.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::connect(SqliteConnectOptions::new().in_memory(true), 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        // An in-memory database lives inside its single connection, so the
        // pool must never recycle it.
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                task_set    TEXT NOT NULL,
                task_id     TEXT NOT NULL,
                input_data  TEXT NOT NULL,
                status      TEXT NOT NULL,
                retries     INTEGER NOT NULL DEFAULT 0,
                result      TEXT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE (task_set, task_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_set_status ON tasks (task_set, status, seq)",
        )
        .execute(&self.pool)
        .await?;

        debug!("task schema ready");
        Ok(())
    }

    /// Use `clock` for timestamps and id generation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    /// Store bound to one task set. Nothing is written until `load`.
    pub fn task_set(&self, name: &str) -> Result<SqliteTaskStore, StoreError> {
        Ok(SqliteTaskStore {
            task_set: TaskSetName::new(name)?,
            db: self.clone(),
        })
    }

    /// Names of the task sets that currently have rows.
    pub async fn task_sets(&self) -> Result<Vec<TaskSetName>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT task_set FROM tasks ORDER BY task_set")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("task_set")?;
                TaskSetName::new(name)
            })
            .collect()
    }

    /// Delete every row of a task set. Returns the number of rows removed.
    pub async fn drop_task_set(&self, name: &TaskSetName) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM tasks WHERE task_set = ?1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        info!(task_set = %name, removed = done.rows_affected(), "dropped task set");
        Ok(done.rows_affected())
    }

    /// Close the pool; later operations fail with a database error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to create {}: {e}", parent.display()))
            }),
        _ => Ok(()),
    }
}

/// `TaskStore` for one task set inside a `TaskDatabase`.
#[derive(Clone)]
pub struct SqliteTaskStore {
    task_set: TaskSetName,
    db: TaskDatabase,
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn task_set(&self) -> &TaskSetName {
        &self.task_set
    }

    async fn load(&self, inputs: Vec<Value>, clear_existing: bool) -> Result<Vec<TaskId>, StoreError> {
        let now = timestamp(self.db.clock.now());
        let mut tx = self.db.pool.begin().await?;

        if clear_existing {
            let purged = sqlx::query("DELETE FROM tasks WHERE task_set = ?1")
                .bind(self.task_set.as_str())
                .execute(&mut *tx)
                .await?;
            debug!(task_set = %self.task_set, purged = purged.rows_affected(), "cleared task set");
        }

        let mut ids = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let task_id = self.db.ids.generate_task_id();
            sqlx::query(
                r#"
                INSERT INTO tasks (
                    task_set,
                    task_id,
                    input_data,
                    status,
                    retries,
                    result,
                    created_at,
                    updated_at
                )
                VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?6)
                "#,
            )
            .bind(self.task_set.as_str())
            .bind(task_id.to_storage())
            .bind(serde_json::to_string(input)?)
            .bind(TaskStatus::Pending.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            ids.push(task_id);
        }

        tx.commit().await?;
        info!(task_set = %self.task_set, loaded = ids.len(), clear_existing, "loaded tasks");
        Ok(ids)
    }

    async fn reclaim_stuck(&self) -> Result<u64, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?2,
                updated_at = ?3
            WHERE task_set = ?1
              AND status = ?4
            "#,
        )
        .bind(self.task_set.as_str())
        .bind(TaskStatus::Pending.as_str())
        .bind(timestamp(self.db.clock.now()))
        .bind(TaskStatus::Processing.as_str())
        .execute(&self.db.pool)
        .await?;
        Ok(done.rows_affected())
    }

    async fn next_pending_batch(&self, n: usize) -> Result<Vec<TaskRecord>, StoreError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_set = ?1 AND status = ?2 ORDER BY seq LIMIT ?3"
        ))
        .bind(self.task_set.as_str())
        .bind(TaskStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(row_to_task).collect()
    }

    async fn mark_processing(&self, task_ids: &[TaskId]) -> Result<u64, StoreError> {
        let now = timestamp(self.db.clock.now());
        let mut tx = self.db.pool.begin().await?;
        let mut marked = 0;
        for task_id in task_ids {
            let done = sqlx::query(
                r#"
                UPDATE tasks
                SET status = ?3,
                    updated_at = ?4
                WHERE task_set = ?1
                  AND task_id = ?2
                  AND status = ?5
                "#,
            )
            .bind(self.task_set.as_str())
            .bind(task_id.to_storage())
            .bind(TaskStatus::Processing.as_str())
            .bind(&now)
            .bind(TaskStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
            marked += done.rows_affected();
        }
        tx.commit().await?;
        Ok(marked)
    }

    async fn apply_outcome(&self, update: TaskUpdate) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?3,
                retries = ?4,
                result = ?5,
                updated_at = ?6
            WHERE task_set = ?1
              AND task_id = ?2
              AND status != ?7
            "#,
        )
        .bind(self.task_set.as_str())
        .bind(update.task_id.to_storage())
        .bind(update.status.as_str())
        .bind(i64::from(update.retries))
        .bind(update.result)
        .bind(timestamp(update.updated_at))
        .bind(TaskStatus::Completed.as_str())
        .execute(&self.db.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn summary(&self) -> Result<TaskSummary, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM tasks WHERE task_set = ?1 GROUP BY status",
        )
        .bind(self.task_set.as_str())
        .fetch_all(&self.db.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status = status
                .parse::<TaskStatus>()
                .map_err(|e| StoreError::corrupt(self.task_set.as_str(), e))?;
            counts.push((status, u64::try_from(n).unwrap_or(0)));
        }
        Ok(TaskSummary::from_counts(counts))
    }

    async fn get_result(&self, task_id: TaskId) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT result FROM tasks WHERE task_set = ?1 AND task_id = ?2 AND status = ?3",
        )
        .bind(self.task_set.as_str())
        .bind(task_id.to_storage())
        .bind(TaskStatus::Completed.as_str())
        .fetch_optional(&self.db.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get("result")?),
            None => Ok(None),
        }
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_set = ?1 AND task_id = ?2"
        ))
        .bind(self.task_set.as_str())
        .bind(task_id.to_storage())
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(row_to_task).transpose()
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE task_set = ?1 AND status = ?2 ORDER BY seq"
                ))
                .bind(self.task_set.as_str())
                .bind(status.as_str())
                .fetch_all(&self.db.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE task_set = ?1 ORDER BY seq"
                ))
                .bind(self.task_set.as_str())
                .fetch_all(&self.db.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_task).collect()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(task_id: &str, column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(task_id, format!("invalid {column}: {e}")))
}

/// Map a database row into a `TaskRecord`.
fn row_to_task(row: SqliteRow) -> Result<TaskRecord, StoreError> {
    let raw_id: String = row.try_get("task_id")?;
    let task_id = raw_id
        .parse::<TaskId>()
        .map_err(|e| StoreError::corrupt(&raw_id, e))?;

    let task_set: String = row.try_get("task_set")?;
    let task_set = TaskSetName::new(task_set).map_err(|e| StoreError::corrupt(&raw_id, e))?;

    let input: String = row.try_get("input_data")?;
    let input_data: Value = serde_json::from_str(&input)
        .map_err(|e| StoreError::corrupt(&raw_id, format!("invalid input_data: {e}")))?;

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| StoreError::corrupt(&raw_id, e))?;

    let retries: i64 = row.try_get("retries")?;
    let retries = u32::try_from(retries)
        .map_err(|_| StoreError::corrupt(&raw_id, format!("invalid retries: {retries}")))?;

    let result: Option<String> = row.try_get("result")?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(TaskRecord {
        task_id,
        task_set,
        input_data,
        status,
        retries,
        result,
        created_at: parse_timestamp(&raw_id, "created_at", &created_at)?,
        updated_at: parse_timestamp(&raw_id, "updated_at", &updated_at)?,
    })
}
