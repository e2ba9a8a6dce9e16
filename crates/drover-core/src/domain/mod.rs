//! Domain model (ids, status, records, outcomes, decisions, summaries, errors).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod status;
pub mod summary;
pub mod task;
pub mod task_set;

pub use decision::{DEFAULT_MAX_RETRIES, Decider, Decision, RetryPolicy};
pub use errors::{DroverError, EngineError, StoreError};
pub use ids::{BatchId, Id, IdMarker, ParseIdError, TaskId};
pub use outcome::Outcome;
pub use status::{ParseStatusError, TaskStatus};
pub use summary::TaskSummary;
pub use task::{CompletedResult, TaskRecord, TaskUpdate};
pub use task_set::TaskSetName;
