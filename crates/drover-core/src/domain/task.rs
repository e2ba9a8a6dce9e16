//! Task record: one unit of work and its persisted state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskSetName, TaskStatus};

/// A task as persisted by a `TaskStore`.
///
/// - `task_id`, `input_data` and `created_at` never change after load.
/// - `retries` only grows, and only on a failed attempt.
/// - `result` is written once, on the transition into `Completed`, and holds
///   the JSON-serialized output. It stays `None` when a custom result sink
///   took ownership of the output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub task_set: TaskSetName,
    pub input_data: serde_json::Value,
    pub status: TaskStatus,
    pub retries: u32,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A freshly loaded task: pending, zero retries, no result.
    pub fn pending(
        task_id: TaskId,
        task_set: TaskSetName,
        input_data: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            task_set,
            input_data,
            status: TaskStatus::Pending,
            retries: 0,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse the stored result back into JSON.
    pub fn result_value(&self) -> Result<Option<serde_json::Value>, serde_json::Error> {
        self.result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }

    /// Apply an outcome update in place (used by the in-memory store).
    pub(crate) fn apply(&mut self, update: &TaskUpdate) {
        self.status = update.status;
        self.retries = update.retries;
        self.result = update.result.clone();
        self.updated_at = update.updated_at;
    }
}

/// One reconciled outcome, written atomically for a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub retries: u32,
    pub result: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `{input, output}` pair for a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedResult {
    pub task_id: TaskId,
    pub input: serde_json::Value,
    /// `None` when the result went to a custom sink instead of the store.
    pub output: Option<serde_json::Value>,
}

impl CompletedResult {
    pub fn from_record(record: &TaskRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            task_id: record.task_id,
            input: record.input_data.clone(),
            output: record.result_value()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn record() -> TaskRecord {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TaskRecord::pending(
            TaskId::from_ulid(Ulid::new()),
            TaskSetName::new("unit").unwrap(),
            json!("input_0"),
            now,
        )
    }

    #[test]
    fn loaded_task_starts_pending_without_result() {
        let task = record();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retries, 0);
        assert_eq!(task.result, None);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn completed_result_parses_stored_json() {
        let mut task = record();
        task.status = TaskStatus::Completed;
        task.result = Some("\"input_0_pred\"".to_string());

        let pair = CompletedResult::from_record(&task).unwrap();
        assert_eq!(pair.input, json!("input_0"));
        assert_eq!(pair.output, Some(json!("input_0_pred")));
    }

    #[test]
    fn sink_owned_result_has_no_output() {
        let mut task = record();
        task.status = TaskStatus::Completed;

        let pair = CompletedResult::from_record(&task).unwrap();
        assert_eq!(pair.output, None);
    }
}
