//! TaskSetName - the caller-supplied name of one logical job.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::StoreError;

const MAX_LEN: usize = 128;

/// Name of a task set.
///
/// Each task set owns an independent namespace of task ids inside a shared
/// store. Names are restricted to `[A-Za-z0-9_.-]{1,128}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskSetName(String);

impl TaskSetName {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_LEN {
            return Err(StoreError::InvalidTaskSet(name));
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StoreError::InvalidTaskSet(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskSetName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskSetName> for String {
    fn from(value: TaskSetName) -> Self {
        value.0
    }
}

impl fmt::Display for TaskSetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
