//! TaskStore port - durable state for one task set.
//!
//! The store is the only writer of task state. Implementations:
//! - `SqliteTaskStore` (durable, `impls::sqlite`)
//! - `InMemoryTaskStore` (tests / ephemeral runs, `impls::memory`)
//!
//! # Atomicity
//! - `load` and `mark_processing` are atomic as a whole.
//! - `apply_outcome` is atomic per task, not across a batch. A crash in the
//!   middle of reconciling a batch leaves some tasks in `Processing`; the next
//!   run's `reclaim_stuck` puts them back to `Pending`.
//!
//! No cross-instance locking: two schedulers on the same task set will race
//! on `mark_processing`.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{
    CompletedResult, StoreError, TaskId, TaskRecord, TaskSetName, TaskStatus, TaskSummary,
    TaskUpdate,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// The task set this store is bound to.
    fn task_set(&self) -> &TaskSetName;

    /// Insert one pending task per input (fresh id, zero retries).
    /// With `clear_existing`, every row of the task set is purged first.
    /// Input content is not validated.
    async fn load(&self, inputs: Vec<Value>, clear_existing: bool)
    -> Result<Vec<TaskId>, StoreError>;

    /// Move every `Processing` task back to `Pending`. Returns how many moved.
    async fn reclaim_stuck(&self) -> Result<u64, StoreError>;

    /// Up to `n` pending tasks in insertion order.
    async fn next_pending_batch(&self, n: usize) -> Result<Vec<TaskRecord>, StoreError>;

    /// Move the given tasks from `Pending` to `Processing`. Tasks in any other
    /// status are left alone. Returns how many moved.
    async fn mark_processing(&self, task_ids: &[TaskId]) -> Result<u64, StoreError>;

    /// Write status/retries/result/updated_at for one task.
    ///
    /// Completed tasks are immutable: the update is skipped and `false`
    /// returned. `false` is also returned for an unknown id.
    async fn apply_outcome(&self, update: TaskUpdate) -> Result<bool, StoreError>;

    /// Counts by status, total and completion percent.
    async fn summary(&self) -> Result<TaskSummary, StoreError>;

    /// Stored result; `None` when absent or not completed.
    async fn get_result(&self, task_id: TaskId) -> Result<Option<String>, StoreError>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// All tasks (or those with `status`), in insertion order.
    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StoreError>;

    /// `{input, output}` pairs for every completed task. Each call re-reads
    /// the store.
    async fn completed_results(&self) -> Result<Vec<CompletedResult>, StoreError> {
        self.list(Some(TaskStatus::Completed))
            .await?
            .iter()
            .map(|record| CompletedResult::from_record(record).map_err(StoreError::from))
            .collect()
    }
}
