//! App - wires the ports together into a runnable scheduler.
//!
//! - **SchedulerBuilder**: configuration and start-up validation
//! - **BatchScheduler**: the dispatch / invoke / reconcile loop
//! - **SchedulerConfig**: the config-file view of the scheduler settings

pub mod builder;
pub mod config;
pub mod scheduler;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::{DEFAULT_BATCH_SIZE, SchedulerConfig};
pub use self::scheduler::{BatchReport, BatchScheduler, ProgressFn, RunReport};
