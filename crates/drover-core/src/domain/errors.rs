//! Error taxonomy.
//!
//! - `EngineError`: the compute engine failed a whole batch. Recovered by the
//!   scheduler through the retry policy; never returned from a run.
//! - `StoreError`: persistence is unavailable or corrupt. Fatal.
//! - `DroverError`: what a scheduler run can fail with.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {task_id}: {reason}")]
    CorruptRecord { task_id: String, reason: String },

    #[error("invalid task set name '{0}'")]
    InvalidTaskSet(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn corrupt(task_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            task_id: task_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Batch-level engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine call failed: {0}")]
    Failed(String),

    #[error("engine returned {actual} outputs for {expected} inputs")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum DroverError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
