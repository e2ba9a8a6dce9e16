//! In-memory task store.
//!
//! Not durable: state lives as long as the process. Used by tests and for
//! ephemeral runs. Several task sets can share one backing map through
//! `InMemoryTaskStore::sibling`, the same way SQLite task sets share a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{
    StoreError, TaskId, TaskRecord, TaskSetName, TaskStatus, TaskSummary, TaskUpdate,
};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

/// Task sets by name; each set keeps its records in insertion order.
type Sets = HashMap<TaskSetName, Vec<TaskRecord>>;

pub struct InMemoryTaskStore {
    task_set: TaskSetName,
    sets: Arc<Mutex<Sets>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskStore {
    pub fn new(task_set: TaskSetName) -> Self {
        Self::with_clock(task_set, Arc::new(SystemClock))
    }

    pub fn with_clock(task_set: TaskSetName, clock: Arc<dyn Clock>) -> Self {
        Self {
            task_set,
            sets: Arc::new(Mutex::new(HashMap::new())),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// A store for another task set backed by the same map.
    pub fn sibling(&self, task_set: TaskSetName) -> Self {
        Self {
            task_set,
            sets: Arc::clone(&self.sets),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }

    /// Overwrite a task's status directly. For tests that simulate a crash
    /// in the middle of a batch.
    #[cfg(test)]
    pub(crate) async fn force_status(&self, task_id: TaskId, status: TaskStatus) {
        let mut sets = self.sets.lock().await;
        if let Some(task) = sets
            .get_mut(&self.task_set)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.task_id == task_id))
        {
            task.status = status;
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn task_set(&self) -> &TaskSetName {
        &self.task_set
    }

    async fn load(&self, inputs: Vec<Value>, clear_existing: bool) -> Result<Vec<TaskId>, StoreError> {
        let now = self.clock.now();
        let mut sets = self.sets.lock().await;
        let tasks = sets.entry(self.task_set.clone()).or_default();
        if clear_existing {
            tasks.clear();
        }

        let mut ids = Vec::with_capacity(inputs.len());
        for input in inputs {
            let task_id = self.ids.generate_task_id();
            tasks.push(TaskRecord::pending(task_id, self.task_set.clone(), input, now));
            ids.push(task_id);
        }
        Ok(ids)
    }

    async fn reclaim_stuck(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut sets = self.sets.lock().await;
        let mut reclaimed = 0;
        for task in sets.get_mut(&self.task_set).into_iter().flatten() {
            if task.status == TaskStatus::Processing {
                task.status = TaskStatus::Pending;
                task.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn next_pending_batch(&self, n: usize) -> Result<Vec<TaskRecord>, StoreError> {
        let sets = self.sets.lock().await;
        Ok(sets
            .get(&self.task_set)
            .into_iter()
            .flatten()
            .filter(|t| t.status.is_dispatchable())
            .take(n)
            .cloned()
            .collect())
    }

    async fn mark_processing(&self, task_ids: &[TaskId]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut sets = self.sets.lock().await;
        let mut marked = 0;
        for task in sets.get_mut(&self.task_set).into_iter().flatten() {
            if task.status.is_dispatchable() && task_ids.contains(&task.task_id) {
                task.status = TaskStatus::Processing;
                task.updated_at = now;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn apply_outcome(&self, update: TaskUpdate) -> Result<bool, StoreError> {
        let mut sets = self.sets.lock().await;
        let Some(task) = sets
            .get_mut(&self.task_set)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.task_id == update.task_id))
        else {
            return Ok(false);
        };
        if task.status == TaskStatus::Completed {
            return Ok(false);
        }
        task.apply(&update);
        Ok(true)
    }

    async fn summary(&self) -> Result<TaskSummary, StoreError> {
        let sets = self.sets.lock().await;
        let counts = sets
            .get(&self.task_set)
            .into_iter()
            .flatten()
            .map(|t| (t.status, 1));
        Ok(TaskSummary::from_counts(counts))
    }

    async fn get_result(&self, task_id: TaskId) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_task(task_id)
            .await?
            .filter(|t| t.status == TaskStatus::Completed)
            .and_then(|t| t.result))
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let sets = self.sets.lock().await;
        Ok(sets
            .get(&self.task_set)
            .and_then(|tasks| tasks.iter().find(|t| t.task_id == task_id))
            .cloned())
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRecord>, StoreError> {
        let sets = self.sets.lock().await;
        Ok(sets
            .get(&self.task_set)
            .into_iter()
            .flatten()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }
}
