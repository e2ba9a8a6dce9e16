//! SchedulerBuilder - wiring and start-up validation.
//!
//! ```ignore
//! let scheduler = SchedulerBuilder::new(store)
//!     .engine(Engine::asynchronous(MyEngine))
//!     .batch_size(32)
//!     .build()?;
//! let report = scheduler.run().await?;
//! ```
//!
//! `build()` fails fast on a missing engine or a zero batch size instead of
//! letting the first run discover it.

use std::sync::Arc;

use crate::app::config::{DEFAULT_BATCH_SIZE, SchedulerConfig};
use crate::app::scheduler::{BatchScheduler, ProgressFn};
use crate::domain::{Decider, RetryPolicy, TaskSummary};
use crate::ports::{Clock, Engine, ResultDestination, ResultSink, SystemClock, TaskStore, UlidGenerator};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("no compute engine configured")]
    MissingEngine,

    #[error("batch size must be at least 1, got {0}")]
    InvalidBatchSize(usize),
}

pub struct SchedulerBuilder {
    store: Arc<dyn TaskStore>,
    engine: Option<Engine>,
    batch_size: usize,
    decider: Arc<dyn Decider>,
    destination: ResultDestination,
    on_progress: Option<ProgressFn>,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            engine: None,
            batch_size: DEFAULT_BATCH_SIZE,
            decider: Arc::new(RetryPolicy::default()),
            destination: ResultDestination::Store,
            on_progress: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn retry_policy(self, policy: RetryPolicy) -> Self {
        self.decider(policy)
    }

    /// Replace the retry policy with any `Decider`.
    pub fn decider(mut self, decider: impl Decider + 'static) -> Self {
        self.decider = Arc::new(decider);
        self
    }

    /// Send successful results to `sink` instead of the store's `result`
    /// column.
    pub fn result_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.destination = ResultDestination::Sink(Arc::new(sink));
        self
    }

    /// Called with the task set summary after every reconciled batch.
    pub fn on_progress(mut self, callback: impl Fn(&TaskSummary) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Apply batch size and retry bound from a config section.
    pub fn config(self, config: &SchedulerConfig) -> Self {
        self.batch_size(config.batch_size)
            .retry_policy(config.retry_policy())
    }

    pub fn build(self) -> Result<BatchScheduler, BuildError> {
        let engine = self.engine.ok_or(BuildError::MissingEngine)?;
        if self.batch_size == 0 {
            return Err(BuildError::InvalidBatchSize(self.batch_size));
        }

        Ok(BatchScheduler {
            store: self.store,
            engine,
            batch_size: self.batch_size,
            decider: self.decider,
            destination: self.destination,
            on_progress: self.on_progress,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
            clock: self.clock,
        })
    }
}
