//! Built-in echo engine for trying the scheduler without a model.

use std::collections::HashSet;

use async_trait::async_trait;
use drover_core::{ComputeEngine, EngineError};
use serde_json::{Value, json};

/// Answers `<input>_pred`, or null for inputs listed in `null_for`.
#[derive(Debug, Default)]
pub struct EchoEngine {
    null_for: HashSet<String>,
}

impl EchoEngine {
    pub fn new(null_for: impl IntoIterator<Item = String>) -> Self {
        Self {
            null_for: null_for.into_iter().collect(),
        }
    }

    fn answer(&self, input: &Value) -> Option<Value> {
        let text = match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if self.null_for.contains(&text) {
            return None;
        }
        Some(json!(format!("{text}_pred")))
    }
}

#[async_trait]
impl ComputeEngine for EchoEngine {
    async fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
        Ok(inputs.iter().map(|input| self.answer(input)).collect())
    }
}
