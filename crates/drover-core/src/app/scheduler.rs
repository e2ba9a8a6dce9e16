//! BatchScheduler - the dispatch / invoke / reconcile loop.
//!
//! # Flow
//! 1. `TaskStore::reclaim_stuck()` once per run
//! 2. Dispatch: `next_pending_batch(batch_size)`; empty means drained
//! 3. `mark_processing()` on the fetched tasks
//! 4. Invoke: `Engine::invoke()` on their inputs, in order
//! 5. Reconcile: `Decider` per task, `ResultDestination` on success,
//!    `apply_outcome()` per task
//! 6. Progress report, back to 2
//!
//! Batches run one at a time. Engine errors go through the retry policy and
//! never stop the loop; store errors end the run.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::{
    BatchId, Decider, DroverError, Outcome, StoreError, TaskRecord, TaskSetName, TaskStatus,
    TaskSummary, TaskUpdate,
};
use crate::ports::{Clock, Engine, IdGenerator, ResultDestination, TaskStore};

pub type ProgressFn = Arc<dyn Fn(&TaskSummary) + Send + Sync>;

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub size: usize,
    /// The engine call failed as a whole.
    pub batch_failed: bool,
    pub completed: usize,
    /// Sent back to pending for another attempt.
    pub retried: usize,
    pub failed: usize,
}

impl BatchReport {
    fn new(batch_id: BatchId, size: usize, batch_failed: bool) -> Self {
        Self {
            batch_id,
            size,
            batch_failed,
            completed: 0,
            retried: 0,
            failed: 0,
        }
    }

    fn count(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Pending | TaskStatus::Processing => self.retried += 1,
        }
    }
}

/// What happened during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub batches: u64,
    /// Tasks moved from processing back to pending at start.
    pub reclaimed: u64,
    /// Stopped by the shutdown signal before the task set drained.
    pub interrupted: bool,
    pub summary: TaskSummary,
}

/// Built by `SchedulerBuilder`.
pub struct BatchScheduler {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) engine: Engine,
    pub(crate) batch_size: usize,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) destination: ResultDestination,
    pub(crate) on_progress: Option<ProgressFn>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("task_set", self.task_set())
            .field("engine", &self.engine)
            .field("batch_size", &self.batch_size)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl BatchScheduler {
    pub fn task_set(&self) -> &TaskSetName {
        self.store.task_set()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run until no pending task remains.
    pub async fn run(&self) -> Result<RunReport, DroverError> {
        // sender dropped at once: the signal stays `false`
        let (_, shutdown) = watch::channel(false);
        self.run_until(shutdown).await
    }

    /// Run until drained or until `shutdown` turns `true`.
    ///
    /// The signal is checked before each dispatch. A batch already handed to
    /// the engine is always reconciled.
    pub async fn run_until(&self, shutdown: watch::Receiver<bool>) -> Result<RunReport, DroverError> {
        let task_set = self.task_set().clone();
        info!(task_set = %task_set, engine = self.engine.kind(), batch_size = self.batch_size, "run started");

        let reclaimed = self.store.reclaim_stuck().await.map_err(|e| self.fatal(e))?;
        if reclaimed > 0 {
            info!(task_set = %task_set, reclaimed, "reclaimed stuck tasks");
        }

        let mut batches = 0;
        let mut interrupted = false;
        loop {
            if *shutdown.borrow() {
                info!(task_set = %task_set, batches, "shutdown requested, stopping");
                interrupted = true;
                break;
            }
            match self.run_batch().await? {
                Some(_) => batches += 1,
                None => break,
            }
        }

        let summary = self.store.summary().await.map_err(|e| self.fatal(e))?;
        info!(
            task_set = %task_set,
            batches,
            completed = summary.completed,
            failed = summary.failed,
            pending = summary.pending,
            total = summary.total,
            percent = %summary.percent,
            "run finished"
        );

        Ok(RunReport {
            batches,
            reclaimed,
            interrupted,
            summary,
        })
    }

    /// Dispatch, invoke and reconcile one batch. `None` when nothing is
    /// pending.
    pub async fn run_batch(&self) -> Result<Option<BatchReport>, DroverError> {
        let tasks = self
            .store
            .next_pending_batch(self.batch_size)
            .await
            .map_err(|e| self.fatal(e))?;
        if tasks.is_empty() {
            return Ok(None);
        }

        let batch_id = self.ids.generate_batch_id();
        let task_ids: Vec<_> = tasks.iter().map(|t| t.task_id).collect();
        let marked = self
            .store
            .mark_processing(&task_ids)
            .await
            .map_err(|e| self.fatal(e))?;
        if marked < task_ids.len() as u64 {
            warn!(batch = %batch_id, marked, size = task_ids.len(), "some tasks were no longer pending");
        }
        debug!(task_set = %self.task_set(), batch = %batch_id, size = tasks.len(), "dispatching batch");

        let inputs = tasks.iter().map(|t| t.input_data.clone()).collect();
        let outcomes: Vec<Outcome> = match self.engine.invoke(inputs).await {
            Ok(outputs) => outputs.into_iter().map(Outcome::from_output).collect(),
            Err(e) => {
                warn!(task_set = %self.task_set(), batch = %batch_id, error = %e, "batch failed");
                vec![Outcome::BatchFailed(e); tasks.len()]
            }
        };

        let batch_failed = outcomes.first().is_some_and(|o| matches!(o, Outcome::BatchFailed(_)));
        let mut report = BatchReport::new(batch_id, tasks.len(), batch_failed);
        for (task, outcome) in tasks.iter().zip(&outcomes) {
            let status = self.reconcile(task, outcome).await.map_err(|e| self.fatal(e))?;
            report.count(status);
        }

        let summary = self.store.summary().await.map_err(|e| self.fatal(e))?;
        self.report_progress(&summary);
        Ok(Some(report))
    }

    async fn reconcile(&self, task: &TaskRecord, outcome: &Outcome) -> Result<TaskStatus, StoreError> {
        let decision = self.decider.decide(task.retries, outcome);

        let result = match (decision.status, outcome) {
            (TaskStatus::Completed, Outcome::Answered(value)) => {
                self.destination.deliver(task.task_id, value)?
            }
            _ => None,
        };

        if matches!(outcome, Outcome::NoAnswer) {
            warn!(
                task_id = %task.task_id,
                retries = decision.retries,
                status = %decision.status,
                "no answer from engine"
            );
        } else if decision.status == TaskStatus::Failed {
            warn!(task_id = %task.task_id, retries = decision.retries, "task failed");
        }

        let applied = self
            .store
            .apply_outcome(TaskUpdate {
                task_id: task.task_id,
                status: decision.status,
                retries: decision.retries,
                result,
                updated_at: self.clock.now(),
            })
            .await?;
        if !applied {
            warn!(task_id = %task.task_id, "outcome not applied, task already completed or gone");
        }
        Ok(decision.status)
    }

    fn report_progress(&self, summary: &TaskSummary) {
        info!(
            task_set = %self.task_set(),
            completed = summary.completed,
            failed = summary.failed,
            total = summary.total,
            percent = %summary.percent,
            "progress: {summary}"
        );
        if let Some(callback) = &self.on_progress {
            callback(summary);
        }
    }

    fn fatal(&self, err: StoreError) -> DroverError {
        error!(task_set = %self.task_set(), error = %err, "store failure, aborting run");
        DroverError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::SchedulerBuilder;
    use crate::domain::{EngineError, RetryPolicy, TaskId};
    use crate::impls::{InMemoryTaskStore, TaskDatabase};
    use crate::ports::{BlockingEngine, ComputeEngine, FixedClock};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `<input>_pred` for every input except those listed, which get null.
    struct Predict {
        null_for: Vec<Value>,
    }

    impl Predict {
        fn all() -> Self {
            Self { null_for: vec![] }
        }

        fn except(input: &str) -> Self {
            Self {
                null_for: vec![json!(input)],
            }
        }
    }

    impl BlockingEngine for Predict {
        fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            Ok(inputs
                .iter()
                .map(|input| {
                    if self.null_for.contains(input) {
                        None
                    } else {
                        Some(json!(format!("{}_pred", input.as_str().unwrap_or_default())))
                    }
                })
                .collect())
        }
    }

    /// Fails the first `failures` calls, then predicts.
    struct FailsFirst {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ComputeEngine for FailsFirst {
        async fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EngineError::failed("cuda out of memory"));
            }
            Predict::all().batch_forward(inputs)
        }
    }

    /// Answers with a JSON `null` body for `input_0`, predicts the rest.
    struct NullBody;

    impl BlockingEngine for NullBody {
        fn batch_forward(&self, inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            Ok(inputs
                .iter()
                .map(|input| {
                    if input == "input_0" {
                        Some(Value::Null)
                    } else {
                        Some(json!(format!("{}_pred", input.as_str().unwrap_or_default())))
                    }
                })
                .collect())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ComputeEngine for AlwaysFails {
        async fn batch_forward(&self, _inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
            Err(EngineError::failed("engine down"))
        }
    }

    fn inputs(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!(format!("input_{i}"))).collect()
    }

    fn memory_store(name: &str) -> Arc<InMemoryTaskStore> {
        Arc::new(InMemoryTaskStore::new(TaskSetName::new(name).unwrap()))
    }

    #[tokio::test]
    async fn drains_mixed_outcomes() {
        let db = TaskDatabase::open_in_memory().await.unwrap();
        let store = Arc::new(db.task_set("scenario_a").unwrap());
        store.load(inputs(10), true).await.unwrap();

        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::except("input_2")))
            .batch_size(3)
            .build()
            .unwrap();
        let report = scheduler.run().await.unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.completed, 9);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.percent, "90.00%");
        assert_eq!(report.summary, summary);
        assert!(!report.interrupted);

        for task in store.list(None).await.unwrap() {
            let input = task.input_data.as_str().unwrap().to_string();
            if input == "input_2" {
                assert_eq!(task.status, TaskStatus::Failed);
                assert_eq!(task.retries, 3);
                assert_eq!(task.result, None);
            } else {
                assert_eq!(task.status, TaskStatus::Completed);
                assert_eq!(task.result_value().unwrap(), Some(json!(format!("{input}_pred"))));
            }
        }
    }

    #[tokio::test]
    async fn batch_failure_is_retried_and_retries_are_kept() {
        let store = memory_store("scenario_b");
        let ids = store.load(inputs(3), true).await.unwrap();
        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::asynchronous(FailsFirst {
                failures: 1,
                calls: AtomicUsize::new(0),
            }))
            .batch_size(3)
            .build()
            .unwrap();

        let first = scheduler.run_batch().await.unwrap().unwrap();
        assert!(first.batch_failed);
        assert_eq!(first.retried, 3);
        for id in &ids {
            let task = store.get_task(*id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.retries, 1);
        }

        let report = scheduler.run().await.unwrap();
        assert_eq!(report.batches, 1);
        for id in &ids {
            let task = store.get_task(*id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.retries, 1);
        }
    }

    #[tokio::test]
    async fn custom_sink_owns_the_result() {
        let store = memory_store("scenario_c");
        let ids = store.load(inputs(1), true).await.unwrap();
        let seen: Arc<Mutex<Vec<(TaskId, Value)>>> = Arc::default();

        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::all()))
            .result_sink({
                let seen = Arc::clone(&seen);
                move |task_id: TaskId, result: &Value| {
                    seen.lock().unwrap().push((task_id, result.clone()));
                }
            })
            .build()
            .unwrap();
        scheduler.run().await.unwrap();

        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, None);
        assert_eq!(store.get_result(ids[0]).await.unwrap(), None);
        assert_eq!(*seen.lock().unwrap(), vec![(ids[0], json!("input_0_pred"))]);
    }

    #[tokio::test]
    async fn engine_that_always_fails_exhausts_bound_plus_one() {
        let store = memory_store("always_fails");
        store.load(inputs(2), true).await.unwrap();
        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::asynchronous(AlwaysFails))
            .build()
            .unwrap();

        let report = scheduler.run().await.unwrap();

        assert_eq!(report.batches, 4);
        assert_eq!(report.summary.failed, 2);
        let tasks = store.list(None).await.unwrap();
        assert!(tasks.iter().all(|t| t.retries == 4));
    }

    #[tokio::test]
    async fn json_null_output_takes_the_retry_path() {
        let store = memory_store("json_null");
        let ids = store.load(inputs(2), true).await.unwrap();
        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(NullBody))
            .build()
            .unwrap();

        let first = scheduler.run_batch().await.unwrap().unwrap();
        assert_eq!((first.completed, first.retried), (1, 1));
        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!((task.status, task.retries), (TaskStatus::Pending, 1));

        scheduler.run().await.unwrap();

        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!((task.status, task.retries), (TaskStatus::Failed, 3));
        assert_eq!(task.result, None);
        assert_eq!(store.get_result(ids[0]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn async_engine_panic_is_retried_not_fatal() {
        struct Panics;

        #[async_trait]
        impl ComputeEngine for Panics {
            async fn batch_forward(&self, _inputs: &[Value]) -> Result<Vec<Option<Value>>, EngineError> {
                panic!("engine blew up");
            }
        }

        let store = memory_store("async_panic");
        let ids = store.load(inputs(1), true).await.unwrap();
        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::asynchronous(Panics))
            .build()
            .unwrap();

        let first = scheduler.run_batch().await.unwrap().unwrap();
        assert!(first.batch_failed);
        let task = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!((task.status, task.retries), (TaskStatus::Pending, 1));

        let report = scheduler.run().await.unwrap();
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.processing, 0);
    }

    #[tokio::test]
    async fn failed_tasks_never_change_again() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let store = memory_store("failed_is_final");
        let ids = store.load(inputs(2), true).await.unwrap();

        SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::except("input_0")))
            .clock(clock.clone())
            .build()
            .unwrap()
            .run()
            .await
            .unwrap();
        let failed = store.get_task(ids[0]).await.unwrap().unwrap();
        assert_eq!((failed.status, failed.retries), (TaskStatus::Failed, 3));
        assert_eq!(failed.updated_at, start);

        clock.advance(Duration::hours(1));
        let report = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::all()))
            .clock(clock.clone())
            .build()
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.batches, 0);
        assert_eq!(store.get_task(ids[0]).await.unwrap().unwrap(), failed);
    }

    #[tokio::test]
    async fn retry_bound_is_configurable() {
        let store = memory_store("bound");
        store.load(inputs(1), true).await.unwrap();
        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::except("input_0")))
            .retry_policy(RetryPolicy::new(5))
            .build()
            .unwrap();

        let report = scheduler.run().await.unwrap();

        assert_eq!(report.batches, 5);
        let task = &store.list(None).await.unwrap()[0];
        assert_eq!((task.status, task.retries), (TaskStatus::Failed, 5));
    }

    #[tokio::test]
    async fn interrupted_batch_is_reclaimed_on_next_run() {
        let store = memory_store("recovery");
        let ids = store.load(inputs(4), true).await.unwrap();
        // a previous run died after dispatching two tasks
        store.mark_processing(&ids[..2]).await.unwrap();

        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::all()))
            .build()
            .unwrap();
        let report = scheduler.run().await.unwrap();

        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.summary.completed, 4);
        assert_eq!(report.summary.processing, 0);
    }

    #[tokio::test]
    async fn completed_tasks_survive_later_runs() {
        let store = memory_store("immutable");
        let ids = store.load(inputs(2), true).await.unwrap();
        SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::all()))
            .build()
            .unwrap()
            .run()
            .await
            .unwrap();

        store.force_status(ids[0], TaskStatus::Processing).await;
        SchedulerBuilder::new(store.clone())
            .engine(Engine::asynchronous(AlwaysFails))
            .build()
            .unwrap()
            .run()
            .await
            .unwrap();

        let untouched = store.get_task(ids[1]).await.unwrap().unwrap();
        assert_eq!(untouched.status, TaskStatus::Completed);
        assert_eq!(untouched.result_value().unwrap(), Some(json!("input_1_pred")));
        assert_eq!(untouched.retries, 0);
    }

    #[tokio::test]
    async fn progress_is_reported_after_every_batch() {
        let store = memory_store("progress");
        store.load(inputs(5), true).await.unwrap();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::default();

        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::all()))
            .batch_size(2)
            .on_progress({
                let seen = Arc::clone(&seen);
                move |summary: &TaskSummary| seen.lock().unwrap().push(summary.completed)
            })
            .build()
            .unwrap();
        let report = scheduler.run().await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(*seen.lock().unwrap(), vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn empty_task_set_drains_immediately() {
        let store = memory_store("empty");
        let scheduler = SchedulerBuilder::new(store)
            .engine(Engine::blocking(Predict::all()))
            .build()
            .unwrap();

        let report = scheduler.run().await.unwrap();

        assert_eq!(report.batches, 0);
        assert_eq!(report.summary.percent, "0.00%");
    }

    #[tokio::test]
    async fn shutdown_stops_before_next_dispatch() {
        let store = memory_store("shutdown");
        store.load(inputs(6), true).await.unwrap();
        let (tx, rx) = watch::channel(false);

        let scheduler = SchedulerBuilder::new(store.clone())
            .engine(Engine::blocking(Predict::all()))
            .batch_size(2)
            .on_progress(move |_: &TaskSummary| {
                let _ = tx.send(true);
            })
            .build()
            .unwrap();
        let report = scheduler.run_until(rx).await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.batches, 1);
        assert_eq!(report.summary.completed, 2);
        assert_eq!(report.summary.pending, 4);
    }

    #[tokio::test]
    async fn store_failure_ends_the_run() {
        let db = TaskDatabase::open_in_memory().await.unwrap();
        let store = Arc::new(db.task_set("broken").unwrap());
        store.load(inputs(2), true).await.unwrap();
        db.close().await;

        let scheduler = SchedulerBuilder::new(store)
            .engine(Engine::blocking(Predict::all()))
            .build()
            .unwrap();
        let err = scheduler.run().await.unwrap_err();

        assert!(matches!(err, DroverError::Store(StoreError::Database(_))));
    }
}
