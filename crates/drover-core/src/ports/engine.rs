//! Compute engine port - the external collaborator that turns a batch of
//! inputs into a batch of outputs.
//!
//! The calling convention is declared when the scheduler is configured
//! (`Engine::Async` or `Engine::Blocking`), never detected at runtime.
//! Either way the scheduler waits for the call to finish before reconciling.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::EngineError;

/// Asynchronous batch engine.
///
/// Returns one output per input, in input order. `None` is the null sentinel
/// ("no answer for this item"). Internal failures must surface as `Err`, not
/// as a vector of `None`s, so the batch-failure retry path is taken.
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    async fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError>;
}

/// Synchronous batch engine. Same contract as `ComputeEngine`; the scheduler
/// runs it on the blocking thread pool.
pub trait BlockingEngine: Send + Sync {
    fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError>;
}

/// Single-item engine, for engines that can only answer one input per call.
/// See `impls::FanOutEngine`.
#[async_trait]
pub trait ItemEngine: Send + Sync {
    async fn infer_one(&self, input: &Value) -> Result<Option<Value>, EngineError>;
}

/// Engine handle with its declared calling convention.
#[derive(Clone)]
pub enum Engine {
    Async(Arc<dyn ComputeEngine>),
    Blocking(Arc<dyn BlockingEngine>),
}

impl Engine {
    pub fn asynchronous(engine: impl ComputeEngine + 'static) -> Self {
        Engine::Async(Arc::new(engine))
    }

    pub fn blocking(engine: impl BlockingEngine + 'static) -> Self {
        Engine::Blocking(Arc::new(engine))
    }

    /// Run one batch and check positional alignment.
    ///
    /// An output vector of the wrong length is a batch failure. So is a panic
    /// inside the engine, whichever calling convention it uses. Async calls
    /// run on their own task for that reason.
    pub async fn invoke(&self, inputs: Vec<Value>) -> Result<Vec<Option<Value>>, EngineError> {
        let expected = inputs.len();
        let outputs = match self {
            Engine::Async(engine) => {
                let engine = Arc::clone(engine);
                tokio::spawn(async move { engine.batch_forward(&inputs).await })
                    .await
                    .map_err(|e| EngineError::Panicked(e.to_string()))??
            }
            Engine::Blocking(engine) => {
                let engine = Arc::clone(engine);
                tokio::task::spawn_blocking(move || engine.batch_forward(&inputs))
                    .await
                    .map_err(|e| EngineError::Panicked(e.to_string()))??
            }
        };
        if outputs.len() != expected {
            return Err(EngineError::LengthMismatch {
                expected,
                actual: outputs.len(),
            });
        }
        Ok(outputs)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Engine::Async(_) => "async",
            Engine::Blocking(_) => "blocking",
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Engine").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Suffix;

    #[async_trait]
    impl ComputeEngine for Suffix {
        async fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            Ok(inputs
                .iter()
                .map(|v| v.as_str().map(|s| json!(format!("{s}_pred"))))
                .collect())
        }
    }

    struct BlockingSuffix;

    impl BlockingEngine for BlockingSuffix {
        fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(inputs.iter().map(|v| Some(v.clone())).collect())
        }
    }

    struct DropsOne;

    impl BlockingEngine for DropsOne {
        fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            Ok(inputs.iter().skip(1).map(|v| Some(v.clone())).collect())
        }
    }

    struct Panics;

    impl BlockingEngine for Panics {
        fn batch_forward(&self, _inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            panic!("engine blew up");
        }
    }

    struct AsyncPanics;

    #[async_trait]
    impl ComputeEngine for AsyncPanics {
        async fn batch_forward(&self, _inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            tokio::task::yield_now().await;
            panic!("async engine blew up");
        }
    }

    #[tokio::test]
    async fn async_engine_outputs_align_with_inputs() {
        let engine = Engine::asynchronous(Suffix);
        let outputs = engine.invoke(vec![json!("a"), json!(1)]).await.unwrap();
        assert_eq!(outputs, vec![Some(json!("a_pred")), None]);
    }

    #[tokio::test]
    async fn blocking_engine_runs_off_the_runtime() {
        let engine = Engine::blocking(BlockingSuffix);
        let outputs = engine.invoke(vec![json!("a")]).await.unwrap();
        assert_eq!(outputs, vec![Some(json!("a"))]);
        assert_eq!(engine.kind(), "blocking");
    }

    #[tokio::test]
    async fn short_output_is_a_batch_failure() {
        let engine = Engine::blocking(DropsOne);
        let err = engine.invoke(vec![json!(1), json!(2)]).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[tokio::test]
    async fn blocking_panic_is_a_batch_failure() {
        let engine = Engine::blocking(Panics);
        let err = engine.invoke(vec![json!(1)]).await.unwrap_err();
        assert!(matches!(err, EngineError::Panicked(_)));
    }

    #[tokio::test]
    async fn async_panic_is_a_batch_failure() {
        let engine = Engine::asynchronous(AsyncPanics);
        let err = engine.invoke(vec![json!(1)]).await.unwrap_err();
        assert!(matches!(err, EngineError::Panicked(_)));
    }
}
