//! Outcome of one attempt at a task, as seen by the retry policy.

use super::errors::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The engine call failed for the whole batch.
    BatchFailed(EngineError),

    /// The engine ran but returned the null sentinel for this item.
    NoAnswer,

    /// The engine produced a usable result.
    Answered(serde_json::Value),
}

impl Outcome {
    /// Map one positional engine output to an outcome. A JSON `null` is the
    /// null sentinel too, not an answer.
    pub fn from_output(output: Option<serde_json::Value>) -> Self {
        match output {
            None | Some(serde_json::Value::Null) => Outcome::NoAnswer,
            Some(value) => Outcome::Answered(value),
        }
    }
}
