//! drover-core
//!
//! Durable, resumable batch task scheduling.
//!
//! A caller loads inputs into a named task set, and the scheduler drains it in
//! fixed-size batches through a compute engine. Each task ends `completed` or
//! `failed` once its retry budget is spent. State lives in the store, so a run
//! that dies half-way picks up where it left off.
//!
//! # Modules
//! - **domain**: ids, statuses, task records, outcomes, retry decisions, errors
//! - **ports**: TaskStore, ComputeEngine, ResultSink, Clock, IdGenerator
//! - **impls**: SQLite and in-memory stores, fan-out engine adapter
//! - **app**: SchedulerBuilder and BatchScheduler

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{BatchScheduler, BuildError, RunReport, SchedulerBuilder, SchedulerConfig};
pub use domain::{DroverError, EngineError, RetryPolicy, StoreError, TaskId, TaskStatus, TaskSummary};
pub use impls::{InMemoryTaskStore, SqliteTaskStore, TaskDatabase};
pub use ports::{ComputeEngine, Engine, TaskStore};
