//! Fan-out engine: turns a single-item engine into a batch engine.
//!
//! Each input becomes its own call, bounded by a semaphore. A call that errors
//! or times out is retried after `retry_delay`; once `call_retries` attempts
//! are spent the item comes back as `None` (no answer) and the rest of the
//! batch is unaffected. Outputs keep input order.
//!
//! Every call runs inside a `JoinSet`, so dropping the batch future aborts
//! whatever is still in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::EngineError;
use crate::ports::{ComputeEngine, ItemEngine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutOptions {
    /// Calls in flight at once.
    pub max_concurrency: usize,
    #[serde(with = "millis")]
    pub call_timeout: Duration,
    /// Attempts per item, including the first.
    pub call_retries: u32,
    #[serde(with = "millis")]
    pub retry_delay: Duration,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            call_timeout: Duration::from_secs(30),
            call_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub struct FanOutEngine<E> {
    engine: Arc<E>,
    options: FanOutOptions,
}

impl<E: ItemEngine + 'static> FanOutEngine<E> {
    pub fn new(engine: E) -> Self {
        Self::with_options(engine, FanOutOptions::default())
    }

    pub fn with_options(engine: E, options: FanOutOptions) -> Self {
        Self {
            engine: Arc::new(engine),
            options,
        }
    }
}

#[async_trait]
impl<E: ItemEngine + 'static> ComputeEngine for FanOutEngine<E> {
    async fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
        let permits = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut calls = JoinSet::new();

        for (index, input) in inputs.iter().cloned().enumerate() {
            let engine = Arc::clone(&self.engine);
            let permits = Arc::clone(&permits);
            let options = self.options.clone();
            calls.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, None);
                };
                (index, call_with_retries(engine.as_ref(), &input, &options).await)
            });
        }

        let mut outputs = vec![None; inputs.len()];
        while let Some(joined) = calls.join_next().await {
            let (index, output) = joined.map_err(|e| EngineError::Panicked(e.to_string()))?;
            outputs[index] = output;
        }
        Ok(outputs)
    }
}

async fn call_with_retries<E: ItemEngine + ?Sized>(
    engine: &E,
    input: &Value,
    options: &FanOutOptions,
) -> Option<Value> {
    let attempts = options.call_retries.max(1);
    for attempt in 1..=attempts {
        let error = match tokio::time::timeout(options.call_timeout, engine.infer_one(input)).await {
            Ok(Ok(output)) => return output,
            Ok(Err(e)) => e,
            Err(_) => EngineError::Timeout(options.call_timeout),
        };

        if attempt < attempts {
            debug!(attempt, error = %error, "item call failed, retrying");
            tokio::time::sleep(options.retry_delay).await;
        } else {
            warn!(attempts, error = %error, "item call exhausted retries");
        }
    }
    None
}
