//! ResultSink port - where a completed task's output goes.
//!
//! By default the output is serialized into the store's `result` column.
//! A custom sink takes ownership instead and the column stays null.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{StoreError, TaskId};

/// Caller-supplied consumer of successful results.
///
/// Called exactly once per task that reaches `Completed`, just before the
/// completion is persisted. A crash between the two makes the task run (and
/// the sink fire) again after reclaim.
pub trait ResultSink: Send + Sync {
    fn accept(&self, task_id: TaskId, result: &Value);
}

impl<F> ResultSink for F
where
    F: Fn(TaskId, &Value) + Send + Sync,
{
    fn accept(&self, task_id: TaskId, result: &Value) {
        self(task_id, result)
    }
}

#[derive(Clone, Default)]
pub enum ResultDestination {
    /// Persist the JSON-serialized result in the store.
    #[default]
    Store,

    /// Hand the result to a custom sink; nothing is persisted.
    Sink(Arc<dyn ResultSink>),
}

impl ResultDestination {
    /// Deliver one result and return what the store should record.
    pub fn deliver(&self, task_id: TaskId, result: &Value) -> Result<Option<String>, StoreError> {
        match self {
            ResultDestination::Store => Ok(Some(serde_json::to_string(result)?)),
            ResultDestination::Sink(sink) => {
                sink.accept(task_id, result);
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for ResultDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultDestination::Store => f.write_str("Store"),
            ResultDestination::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}
